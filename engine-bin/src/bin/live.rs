//! Live-trading entrypoint. Wires the same order manager / risk engine /
//! algorithm stack as paper mode, with the exchange gateway backed by a
//! real [`engine_core::gateway::RequestSender`] binding.
//!
//! The gateway's own module docs call this transport "intentionally left
//! as a seam" — this binary is the integration point a deployment supplies
//! its exchange-specific signing/HTTP client at. [`UnconfiguredSender`]
//! below is the seam's placeholder: it fails every call with a clear
//! message rather than silently no-op'ing, so starting `engine-live`
//! without wiring a real binding is loud, not quietly wrong.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use engine_bin::common::{init_logging, install_shutdown_handler, load_config, spawn_metrics_server};
use engine_core::catalog::SymbolCatalog;
use engine_core::errors::TransportError;
use engine_core::events::SequenceCounter;
use engine_core::gateway::{PlaceOrderAck, PlaceOrderRequest, RequestSender, RestGateway};
use engine_core::marketdata::MarketDataFanout;
use engine_core::monitoring::EngineMetrics;
use engine_core::orders::manager::OrderManager;
use engine_core::persistence::InMemoryPersistence;
use engine_core::risk::RiskEngine;
use engine_core::router::{ChannelCommandSource, CommandDispatcher};
use tokio::sync::Mutex;

struct UnconfiguredSender;

#[async_trait]
impl RequestSender for UnconfiguredSender {
    async fn place(&self, _req: &PlaceOrderRequest) -> Result<PlaceOrderAck, TransportError> {
        Err(TransportError::fatal("NO_BINDING", "no exchange RequestSender configured for engine-live"))
    }

    async fn cancel(&self, _symbol: &str, _exchange_order_id: &str) -> Result<(), TransportError> {
        Err(TransportError::fatal("NO_BINDING", "no exchange RequestSender configured for engine-live"))
    }

    async fn cancel_all(&self, _symbol: &str) -> Result<(), TransportError> {
        Err(TransportError::fatal("NO_BINDING", "no exchange RequestSender configured for engine-live"))
    }

    async fn server_time_ms(&self) -> Result<i64, TransportError> {
        Err(TransportError::fatal("NO_BINDING", "no exchange RequestSender configured for engine-live"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = engine_bin::common::CommonArgs::parse();
    init_logging(&args.log_level)?;

    let config = load_config(&args.config)?;
    if config.execution.mode != "live" {
        tracing::warn!(mode = %config.execution.mode, "config execution.mode is not 'live'; running the live binary anyway");
    }
    if config.gateway.api_key.is_none() {
        tracing::warn!("no gateway.api_key configured; placements will be rejected until a real RequestSender is wired in");
    }

    let metrics = Arc::new(EngineMetrics::new()?);
    spawn_metrics_server(&config, metrics.clone());

    let fanout = Arc::new(MarketDataFanout::new());
    let catalog = Arc::new(SymbolCatalog::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let seq = Arc::new(SequenceCounter::new());
    let risk = Arc::new(Mutex::new(RiskEngine::new(seq.clone())));

    let gateway = Arc::new(RestGateway::new(UnconfiguredSender));
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

    tracing::info!("live engine running — press ctrl-c to stop");
    let running = install_shutdown_handler();
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    router_handle.abort();
    tracing::info!("live engine shut down");
    Ok(())
}
