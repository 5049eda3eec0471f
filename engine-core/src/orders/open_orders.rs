//! Open-orders mirror (§4.4): a cross-task-readable projection of each
//! account's currently-resting orders, kept in step with the registry by
//! the order manager. Unlike [`super::registry::OrderRegistry`] (owned
//! exclusively behind the manager's own lock), this is read by anything
//! that wants a cheap per-account order list — a status command handler, a
//! UI poll — without contending with the placement/fill path's
//! `Mutex<OrderRegistry>`. `DashMap` here for the same reason `catalog` and
//! `marketdata` use it: read from outside the loop that owns writes.

use dashmap::DashMap;

use super::types::{Order, Side};

#[derive(Debug, Clone)]
pub struct OpenOrderView {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Option<f64>,
    pub quantity: f64,
    pub filled_qty: f64,
}

impl From<&Order> for OpenOrderView {
    fn from(order: &Order) -> Self {
        Self {
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            filled_qty: order.filled_qty,
        }
    }
}

#[derive(Debug, Default)]
pub struct OpenOrdersMirror {
    by_account: DashMap<String, DashMap<String, OpenOrderView>>,
}

impl OpenOrdersMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account_id: &str, order: &Order) {
        self.by_account.entry(account_id.to_string()).or_default().insert(order.client_order_id.clone(), OpenOrderView::from(order));
    }

    pub fn remove(&self, account_id: &str, client_order_id: &str) {
        if let Some(orders) = self.by_account.get(account_id) {
            orders.remove(client_order_id);
        }
    }

    pub fn for_account(&self, account_id: &str) -> Vec<OpenOrderView> {
        self.by_account.get(account_id).map(|orders| orders.iter().map(|e| e.value().clone()).collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::types::{OrderType, Origin};

    #[test]
    fn insert_then_remove_clears_the_account_entry() {
        let mirror = OpenOrdersMirror::new();
        let order = Order::new("acct1", "BTCUSDT", Side::Buy, OrderType::Limit, 0.01, Some(100.0), None, 10, false, Origin::Manual, None);
        mirror.insert("acct1", &order);
        assert_eq!(mirror.for_account("acct1").len(), 1);

        mirror.remove("acct1", &order.client_order_id);
        assert!(mirror.for_account("acct1").is_empty());
    }

    #[test]
    fn unknown_account_returns_empty() {
        let mirror = OpenOrdersMirror::new();
        assert!(mirror.for_account("ghost").is_empty());
    }
}
