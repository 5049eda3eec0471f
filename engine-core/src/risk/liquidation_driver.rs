//! Liquidation execution (§4.10, §4.9): turns the `LiquidationSignal`s
//! [`RiskEngine::on_tick`] computes into reduce-only market closes sent
//! through the order manager. The evaluation itself lives in
//! [`super::liquidation`]; this module is the only caller that acts on it.

use std::sync::Arc;

use tokio::sync::{mpsc::UnboundedSender, Mutex};

use crate::events::{build_event, Event, EventKind, SequenceCounter};
use crate::orders::manager::{OrderCallbacks, OrderManager};
use crate::orders::types::Origin;
use crate::risk::RiskEngine;

/// Drive one mark-price tick through the risk engine and execute whatever
/// liquidation closes it calls for. `symbol`/`mark_price` is typically fed
/// by the market-data fan-out's own tick callback.
pub async fn handle_tick(risk: &Mutex<RiskEngine>, manager: &OrderManager, seq: &SequenceCounter, events: &UnboundedSender<Event>, symbol: &str, mark_price: f64) {
    let signals = risk.lock().await.on_tick(symbol, mark_price);

    for (account_id, signal) in signals {
        let Some(signal) = signal else { continue };
        tracing::warn!(account_id = %account_id, tier = ?signal.tier, ratio = signal.ratio, "liquidation tier breached");

        for position_id in &signal.position_ids {
            let Some(position) = risk.lock().await.position(&account_id, position_id) else { continue };
            let side = position.side.closing_side();

            manager
                .place_market(&account_id, &position.symbol, side, position.quantity, position.leverage, Origin::Liquidation, None, true, OrderCallbacks::default())
                .await;

            tracing::warn!(account_id = %account_id, position_id = %position_id, quantity = position.quantity, "liquidation close sent");
            let _ = events.send(build_event(seq, EventKind::PositionReduced { position_id: position_id.clone(), closed_qty: position.quantity }, None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SymbolCatalog;
    use crate::gateway::{BatchItemResult, ExchangeGateway, PlaceOrderAck, PlaceOrderRequest};
    use crate::orders::types::PositionSide;
    use crate::persistence::InMemoryPersistence;
    use crate::risk::position_book::{AccountMeta, RiskRules, VirtualPosition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingGateway {
        placed: AtomicU32,
    }

    #[async_trait]
    impl ExchangeGateway for CountingGateway {
        async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderAck, crate::errors::TransportError> {
            self.placed.fetch_add(1, Ordering::SeqCst);
            Ok(PlaceOrderAck { exchange_order_id: format!("EX-{}", req.client_order_id) })
        }
        async fn place_batch(&self, reqs: Vec<PlaceOrderRequest>) -> Vec<BatchItemResult> {
            let mut out = Vec::new();
            for r in reqs {
                out.push(BatchItemResult { client_order_id: r.client_order_id.clone(), result: self.place_order(r).await });
            }
            out
        }
        async fn cancel_order(&self, _symbol: &str, _exchange_order_id: &str) -> Result<(), crate::errors::TransportError> {
            Ok(())
        }
        async fn cancel_all(&self, _symbol: &str) -> Result<(), crate::errors::TransportError> {
            Ok(())
        }
        fn clock_offset_ms(&self) -> i64 {
            0
        }
    }

    #[tokio::test]
    async fn tier3_breach_fires_a_reduce_only_close() {
        let seq = Arc::new(SequenceCounter::new());
        let mut engine = RiskEngine::new(seq.clone());
        engine.book_mut().load_account(
            "acct1",
            AccountMeta { balance: 100.0, maintenance_rate: 0.005, adl_threshold: 0.90, status: crate::risk::position_book::AccountStatus::Active },
            vec![VirtualPosition::new("pos1", "acct1", "BTCUSDT", PositionSide::Long, 100.0, 10.0, 10)],
            RiskRules::default(),
        );
        let risk = Mutex::new(engine);

        let gateway = Arc::new(CountingGateway { placed: AtomicU32::new(0) });
        let manager = OrderManager::new(
            gateway.clone(),
            Arc::new(SymbolCatalog::new()),
            Arc::new(InMemoryPersistence::new()),
            seq.clone(),
            Arc::new(Mutex::new(RiskEngine::new(seq.clone()))),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // A deep enough adverse move to breach tier 3 on 10x leverage.
        handle_tick(&risk, &manager, &seq, &tx, "BTCUSDT", 1.0).await;

        assert_eq!(gateway.placed.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_ok());
    }
}
