//! Paper-trading entrypoint: same order manager / risk engine / algorithm
//! stack as live mode, with the exchange gateway backed by
//! [`engine_core::gateway::PaperMatcher`] against the market-data fan-out
//! instead of a real exchange connection.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use engine_bin::common::{init_logging, install_shutdown_handler, load_config, spawn_metrics_server};
use engine_core::catalog::SymbolCatalog;
use engine_core::events::SequenceCounter;
use engine_core::gateway::{PaperMatcher, RestGateway};
use engine_core::marketdata::MarketDataFanout;
use engine_core::monitoring::EngineMetrics;
use engine_core::orders::manager::OrderManager;
use engine_core::persistence::InMemoryPersistence;
use engine_core::risk::RiskEngine;
use engine_core::router::{ChannelCommandSource, CommandDispatcher};
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = engine_bin::common::CommonArgs::parse();
    init_logging(&args.log_level)?;

    let config = load_config(&args.config)?;
    if config.execution.mode != "paper" {
        tracing::warn!(mode = %config.execution.mode, "config execution.mode is not 'paper'; running in paper mode anyway");
    }

    let metrics = Arc::new(EngineMetrics::new()?);
    spawn_metrics_server(&config, metrics.clone());

    let fanout = Arc::new(MarketDataFanout::new());
    let catalog = Arc::new(SymbolCatalog::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let seq = Arc::new(SequenceCounter::new());
    let risk = Arc::new(Mutex::new(RiskEngine::new(seq.clone())));

    let gateway = Arc::new(RestGateway::new(PaperMatcher::new(fanout.clone())));
    let manager = Arc::new(OrderManager::new(gateway, catalog, persistence, seq.clone(), risk.clone()));

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

    let dispatcher = Arc::new(CommandDispatcher::new(manager, risk, fanout, seq, events_tx));
    let source = Arc::new(ChannelCommandSource::new(256, Duration::from_secs(config.router.reply_ttl_secs)));

    let router_handle = {
        let source = source.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            engine_core::router::run(&*source, |kind, envelope| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.dispatch(kind, envelope).await }
            })
            .await;
        })
    };

    tracing::info!("paper engine running — press ctrl-c to stop");
    let running = install_shutdown_handler();
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    router_handle.abort();
    tracing::info!("paper engine shut down");
    Ok(())
}
