//! Event envelope (§6): everything the engine publishes outward carries a
//! monotonic sequence number so consumers can detect gaps, and an optional
//! account snapshot so they don't have to re-fetch state after an
//! order/position event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub position_id: String,
    pub symbol: String,
    pub side: &'static str,
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub pnl_percent: f64,
}

/// `snapshot(account)` from §4.10 — used by every event emitter that
/// carries an `account` field.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    pub margin_used: f64,
    pub available_margin: f64,
    pub positions: Vec<PositionSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    OrderPlaced { client_order_id: String },
    OrderActive { client_order_id: String },
    OrderPartial { client_order_id: String, filled_qty: f64 },
    OrderFilled { client_order_id: String, fill_price: f64, fill_qty: f64 },
    OrderCancelled { client_order_id: String, reason: String },
    OrderFailed { client_order_id: String, reason: String },
    PositionUpdated { position_id: String },
    PositionReduced { position_id: String, closed_qty: f64 },
    PositionClosed { position_id: String, stale_cleanup: bool },
    MarginUpdate { account_id: String },
    ChaseStarted { chase_id: String },
    ChaseProgress { chase_id: String, reprices: u32 },
    ChaseFilled { chase_id: String },
    ChaseCancelled { chase_id: String, reason: String },
    ScalperProgress { scalper_id: String, filled_legs: u32 },
    ScalperFilled { scalper_id: String },
    ScalperCancelled { scalper_id: String, reason: String },
    TwapStarted { twap_id: String },
    TwapProgress { twap_id: String, lots_done: u32, lots_total: u32 },
    TwapCompleted { twap_id: String },
    TwapCancelled { twap_id: String, reason: String },
    TrailStopStarted { trail_stop_id: String },
    TrailStopTriggered { trail_stop_id: String },
    TrailStopCancelled { trail_stop_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountSnapshot>,
}

/// Monotonic sequence generator shared by every event emitter.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub fn build_event(seq_counter: &SequenceCounter, kind: EventKind, account: Option<AccountSnapshot>) -> Event {
    Event { seq: seq_counter.next(), kind, timestamp: crate::orders::now_ms(), account }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counter_is_strictly_increasing() {
        let counter = SequenceCounter::new();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn build_event_stamps_timestamp_and_sequence() {
        let counter = SequenceCounter::new();
        let ev = build_event(&counter, EventKind::OrderPlaced { client_order_id: "x".into() }, None);
        assert_eq!(ev.seq, 0);
        assert!(ev.timestamp > 0);
    }
}
