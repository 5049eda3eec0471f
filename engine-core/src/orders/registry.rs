//! Order registry (§4.4): primary store plus secondary indexes, owned
//! exclusively by the single-threaded event loop (§5 — no cross-thread
//! mutation, so plain `HashMap`/`HashSet` rather than `DashMap` here; the
//! catalog is read-mostly and shared across fan-out tasks, this isn't).

use std::collections::{HashMap, HashSet};

use super::state::{is_valid_transition, STALE_PLACING_MS, TERMINAL_RETENTION_MS};
use super::types::{Fill, Order, OrderStatus};

#[derive(Debug, Default)]
pub struct OrderRegistry {
    by_client_id: HashMap<String, Order>,
    by_exchange_id: HashMap<String, String>,
    by_account: HashMap<String, HashSet<String>>,
    by_symbol: HashMap<String, HashSet<String>>,
    by_parent: HashMap<String, HashSet<String>>,
    /// `updated_at` at the moment each order most recently entered a
    /// terminal state — drives the 5-minute cleanup sweep independent of
    /// `updated_at`, which later events (e.g. a late duplicate fill) must
    /// not be allowed to keep resetting.
    terminal_since: HashMap<String, u64>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, order: Order) {
        let client_id = order.client_order_id.clone();
        if let Some(exch_id) = &order.exchange_order_id {
            self.by_exchange_id.insert(exch_id.clone(), client_id.clone());
        }
        self.by_account.entry(order.account_id.clone()).or_default().insert(client_id.clone());
        self.by_symbol.entry(order.symbol.clone()).or_default().insert(client_id.clone());
        if let Some(parent) = &order.parent_id {
            self.by_parent.entry(parent.clone()).or_default().insert(client_id.clone());
        }
        if order.status.is_terminal() {
            self.terminal_since.insert(client_id.clone(), order.updated_at);
        }
        self.by_client_id.insert(client_id, order);
    }

    pub fn unregister(&mut self, client_id: &str) -> Option<Order> {
        let order = self.by_client_id.remove(client_id)?;
        if let Some(exch_id) = &order.exchange_order_id {
            self.by_exchange_id.remove(exch_id);
        }
        if let Some(set) = self.by_account.get_mut(&order.account_id) {
            set.remove(client_id);
        }
        if let Some(set) = self.by_symbol.get_mut(&order.symbol) {
            set.remove(client_id);
        }
        if let Some(parent) = &order.parent_id {
            if let Some(set) = self.by_parent.get_mut(parent) {
                set.remove(client_id);
            }
        }
        self.terminal_since.remove(client_id);
        Some(order)
    }

    pub fn get(&self, client_id: &str) -> Option<&Order> {
        self.by_client_id.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut Order> {
        self.by_client_id.get_mut(client_id)
    }

    pub fn by_exchange_order_id(&self, exchange_order_id: &str) -> Option<&Order> {
        self.by_exchange_id.get(exchange_order_id).and_then(|cid| self.by_client_id.get(cid))
    }

    /// Bind an exchange order id to an already-registered order (the ack
    /// following a place call).
    pub fn bind_exchange_id(&mut self, client_id: &str, exchange_order_id: String) {
        if let Some(order) = self.by_client_id.get_mut(client_id) {
            order.exchange_order_id = Some(exchange_order_id.clone());
            self.by_exchange_id.insert(exchange_order_id, client_id.to_string());
        }
    }

    pub fn orders_for_account(&self, account_id: &str) -> Vec<&Order> {
        self.by_account
            .get(account_id)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|cid| self.by_client_id.get(cid))
            .collect()
    }

    pub fn orders_for_symbol(&self, symbol: &str) -> Vec<&Order> {
        self.by_symbol
            .get(symbol)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|cid| self.by_client_id.get(cid))
            .collect()
    }

    pub fn children_of(&self, parent_id: &str) -> Vec<&Order> {
        self.by_parent
            .get(parent_id)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|cid| self.by_client_id.get(cid))
            .collect()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.by_client_id.values().filter(|o| o.status.is_active())
    }

    /// Attempt `order.status -> target`. Returns `false` and logs without
    /// mutating on an invalid edge (§4.4, §8).
    pub fn transition(&mut self, client_id: &str, target: OrderStatus, now_ms: u64) -> bool {
        let Some(order) = self.by_client_id.get_mut(client_id) else {
            tracing::warn!(client_id, "transition requested for unknown order");
            return false;
        };
        if !is_valid_transition(order.status, target) {
            tracing::warn!(client_id, from = order.status.as_str(), to = target.as_str(), "rejected invalid order transition");
            return false;
        }
        order.status = target;
        order.updated_at = now_ms;
        if target.is_terminal() {
            self.terminal_since.insert(client_id.to_string(), now_ms);
        }
        true
    }

    /// Apply a fill and, if it fully fills the order, transition to `filled`.
    pub fn apply_fill(&mut self, client_id: &str, fill: Fill, now_ms: u64) -> bool {
        let Some(order) = self.by_client_id.get_mut(client_id) else {
            return false;
        };
        order.apply_fill(fill.price, fill.quantity, now_ms);
        if order.remaining_qty() <= 0.0 && order.status != OrderStatus::Filled {
            return self.transition(client_id, OrderStatus::Filled, now_ms);
        }
        true
    }

    /// Sweep orders stuck in `placing` past [`STALE_PLACING_MS`] to `failed`.
    /// Returns the client ids that were swept.
    pub fn sweep_stale(&mut self, now_ms: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .by_client_id
            .values()
            .filter(|o| o.is_stale(now_ms, STALE_PLACING_MS))
            .map(|o| o.client_order_id.clone())
            .collect();
        for client_id in &stale {
            self.transition(client_id, OrderStatus::Failed, now_ms);
        }
        stale
    }

    /// Unregister terminal orders that have sat past [`TERMINAL_RETENTION_MS`].
    /// Returns the client ids removed.
    pub fn sweep_terminal(&mut self, now_ms: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .terminal_since
            .iter()
            .filter(|(_, since)| now_ms.saturating_sub(**since) > TERMINAL_RETENTION_MS)
            .map(|(cid, _)| cid.clone())
            .collect();
        for client_id in &expired {
            self.unregister(client_id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_client_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client_id.is_empty()
    }
}
