//! Persistent state schema and trait (§6). The engine is the producer of
//! this journal; storage backend is a seam (`Persistence`) so paper and
//! live modes, and tests, can swap in different sinks.
//!
//! `rust_decimal::Decimal` is used here (not the `f64` the rest of the
//! engine computes in) because a journal needs exact decimal
//! representation rather than float semantics — see DESIGN.md Open
//! Question #3.

use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionRowStatus {
    Open,
    Closed,
    Liquidated,
    TakenOver,
}

#[derive(Debug, Clone)]
pub struct VirtualPositionRow {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: &'static str,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub leverage: u32,
    pub margin: Decimal,
    pub liquidation_price: Decimal,
    pub status: PositionRowStatus,
    pub realized_pnl: Option<Decimal>,
    pub opened_at: u64,
    pub closed_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Open,
    Close,
    Add,
    Liquidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeRowStatus {
    Pending,
    Filled,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TradeExecutionRow {
    pub id: String,
    pub account_id: String,
    pub position_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: &'static str,
    pub order_type: &'static str,
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub action: TradeAction,
    pub origin: &'static str,
    pub status: TradeRowStatus,
    pub signature: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct BalanceLogRow {
    pub id: String,
    pub account_id: String,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub change_amount: Decimal,
    pub reason: String,
    pub trade_id: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOrderStatus {
    Pending,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PendingOrderRow {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: &'static str,
    pub order_type: &'static str,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub leverage: u32,
    pub exchange_order_id: Option<String>,
    pub status: PendingOrderStatus,
    pub created_at: u64,
    pub filled_at: Option<u64>,
    pub cancelled_at: Option<u64>,
}

/// Durable storage seam. Implementations upsert by primary key; callers
/// never need read-modify-write semantics beyond what each method name
/// implies.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn upsert_position(&self, row: VirtualPositionRow) -> anyhow::Result<()>;
    async fn insert_trade_execution(&self, row: TradeExecutionRow) -> anyhow::Result<()>;
    async fn insert_balance_log(&self, row: BalanceLogRow) -> anyhow::Result<()>;
    async fn upsert_pending_order(&self, row: PendingOrderRow) -> anyhow::Result<()>;

    /// Cold-start recovery source of truth for account ownership (§4.5).
    async fn load_pending_orders(&self, account_id: &str) -> anyhow::Result<Vec<PendingOrderRow>>;
    async fn load_open_positions(&self, account_id: &str) -> anyhow::Result<Vec<VirtualPositionRow>>;
}

/// In-memory implementation for paper mode and tests.
#[derive(Default)]
pub struct InMemoryPersistence {
    positions: parking_lot::Mutex<std::collections::HashMap<String, VirtualPositionRow>>,
    trades: parking_lot::Mutex<Vec<TradeExecutionRow>>,
    balance_logs: parking_lot::Mutex<Vec<BalanceLogRow>>,
    pending_orders: parking_lot::Mutex<std::collections::HashMap<String, PendingOrderRow>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn upsert_position(&self, row: VirtualPositionRow) -> anyhow::Result<()> {
        self.positions.lock().insert(row.id.clone(), row);
        Ok(())
    }

    async fn insert_trade_execution(&self, row: TradeExecutionRow) -> anyhow::Result<()> {
        self.trades.lock().push(row);
        Ok(())
    }

    async fn insert_balance_log(&self, row: BalanceLogRow) -> anyhow::Result<()> {
        self.balance_logs.lock().push(row);
        Ok(())
    }

    async fn upsert_pending_order(&self, row: PendingOrderRow) -> anyhow::Result<()> {
        self.pending_orders.lock().insert(row.id.clone(), row);
        Ok(())
    }

    async fn load_pending_orders(&self, account_id: &str) -> anyhow::Result<Vec<PendingOrderRow>> {
        Ok(self.pending_orders.lock().values().filter(|r| r.account_id == account_id).cloned().collect())
    }

    async fn load_open_positions(&self, account_id: &str) -> anyhow::Result<Vec<VirtualPositionRow>> {
        Ok(self
            .positions
            .lock()
            .values()
            .filter(|r| r.account_id == account_id && matches!(r.status, PositionRowStatus::Open))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn in_memory_persistence_round_trips_pending_orders() {
        let store = InMemoryPersistence::new();
        store
            .upsert_pending_order(PendingOrderRow {
                id: "cid1".into(),
                account_id: "acct1".into(),
                symbol: "BTCUSDT".into(),
                side: "BUY",
                order_type: "LIMIT",
                price: Some(dec!(100.0)),
                quantity: dec!(0.01),
                leverage: 10,
                exchange_order_id: None,
                status: PendingOrderStatus::Pending,
                created_at: 1,
                filled_at: None,
                cancelled_at: None,
            })
            .await
            .unwrap();

        let loaded = store.load_pending_orders("acct1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "cid1");
    }
}
