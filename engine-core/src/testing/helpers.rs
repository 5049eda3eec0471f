//! Test helper utilities for creating test data and assertions
//!
//! Provides convenient builders and utilities for:
//! - Orderbook snapshot creation
//! - Position and account setup
//! - Order/fill creation
//! - Performance assertions
//! - Metrics collection

use crate::marketdata::OrderbookSnapshot;
use crate::monitoring::EngineMetrics;
use crate::orders::{Order, OrderType, Origin, Side};
use crate::risk::position_book::{AccountMeta, AccountStatus, RiskRules, VirtualPosition};
use crate::orders::PositionSide;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build an orderbook snapshot with a single level on each side.
pub fn create_test_snapshot(symbol: &str, bid_price: f64, ask_price: f64, bid_size: f64, ask_size: f64) -> OrderbookSnapshot {
    OrderbookSnapshot { symbol: symbol.to_string(), bids: vec![(bid_price, bid_size)], asks: vec![(ask_price, ask_size)] }
}

/// A simple BTCUSDT snapshot with a 5-dollar spread, 1.0-sized levels.
pub fn create_simple_snapshot(symbol: &str) -> OrderbookSnapshot {
    create_test_snapshot(symbol, 50_000.0, 50_005.0, 1.0, 1.0)
}

/// Build a test order in `Idle` state, ready to be submitted through an
/// [`crate::orders::manager::OrderManager`].
pub fn create_test_order(account_id: &str, symbol: &str, side: Side, quantity: f64, price: Option<f64>) -> Order {
    Order::new(account_id, symbol, side, OrderType::Limit, quantity, price, None, 1, false, Origin::Manual, None)
}

/// Build a test position with the given entry/quantity, mark equal to entry
/// (zero unrealized PnL).
pub fn create_test_position(account_id: &str, symbol: &str, side: PositionSide, entry_price: f64, quantity: f64, leverage: u32) -> VirtualPosition {
    VirtualPosition::new(format!("{account_id}-{symbol}-{}", side.as_str()), account_id, symbol, side, entry_price, quantity, leverage)
}

/// Build a test position and immediately mark it to a different price, so
/// `unrealized_pnl` is populated.
pub fn create_test_position_with_pnl(account_id: &str, symbol: &str, side: PositionSide, entry_price: f64, quantity: f64, leverage: u32, mark_price: f64) -> VirtualPosition {
    let mut pos = create_test_position(account_id, symbol, side, entry_price, quantity, leverage);
    pos.update_mark(mark_price);
    pos
}

/// Build account metadata with a funded balance and default risk posture.
pub fn create_test_account_meta(balance: f64) -> AccountMeta {
    AccountMeta { balance, status: AccountStatus::Active, ..Default::default() }
}

/// Assert that an operation completes within expected latency
pub fn assert_within_latency<F>(max_latency: Duration, operation: F, operation_name: &str)
where
    F: FnOnce(),
{
    let start = Instant::now();
    operation();
    let elapsed = start.elapsed();

    assert!(
        elapsed <= max_latency,
        "{} took {:?}, expected <= {:?}",
        operation_name,
        elapsed,
        max_latency
    );
}

/// Measure operation latency
pub fn measure_latency<F, R>(operation: F) -> (R, Duration)
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let result = operation();
    let elapsed = start.elapsed();
    (result, elapsed)
}

/// Measure average latency over multiple runs
pub fn measure_average_latency<F>(iterations: usize, mut operation: F) -> Duration
where
    F: FnMut(),
{
    let start = Instant::now();
    for _ in 0..iterations {
        operation();
    }
    let total = start.elapsed();
    total / iterations as u32
}

/// Create a fresh metrics registry for use in tests that exercise code
/// paths recording to it.
pub fn create_test_metrics() -> Arc<EngineMetrics> {
    Arc::new(EngineMetrics::new().expect("failed to create test metrics registry"))
}

/// Default risk rules used across fixtures unless a test overrides them.
pub fn default_test_risk_rules() -> RiskRules {
    RiskRules::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_test_snapshot_round_trips_levels() {
        let snapshot = create_simple_snapshot("BTCUSDT");
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.bids[0].0, 50_000.0);
        assert_eq!(snapshot.asks[0].0, 50_005.0);
    }

    #[test]
    fn create_test_order_starts_idle() {
        let order = create_test_order("acct0001", "BTCUSDT", Side::Buy, 0.01, Some(50_000.0));
        assert_eq!(order.status, crate::orders::OrderStatus::Idle);
        assert_eq!(order.quantity, 0.01);
    }

    #[test]
    fn create_test_position_with_pnl_marks_the_position() {
        let pos = create_test_position_with_pnl("acct0001", "BTCUSDT", PositionSide::Long, 50_000.0, 0.01, 10, 50_500.0);
        assert!(pos.unrealized_pnl > 0.0);
    }

    #[test]
    fn assert_within_latency_passes_for_fast_operations() {
        assert_within_latency(Duration::from_millis(10), || {
            let _x = 1 + 1;
        }, "fast operation");
    }

    #[test]
    fn measure_latency_returns_the_operation_result() {
        let (result, latency) = measure_latency(|| {
            std::thread::sleep(Duration::from_millis(1));
            42
        });

        assert_eq!(result, 42);
        assert!(latency >= Duration::from_millis(1));
    }

    #[test]
    fn measure_average_latency_is_fast_for_cheap_work() {
        let avg = measure_average_latency(10, || {
            let _x = (0..100).sum::<i32>();
        });
        assert!(avg < Duration::from_millis(1));
    }

    #[test]
    fn create_test_metrics_registers_all_families() {
        let metrics = create_test_metrics();
        assert!(!metrics.registry().gather().is_empty());
    }
}
