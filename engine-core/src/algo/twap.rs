//! TWAP algorithm (§4.13): interval-sliced market lots with jitter and an
//! optional price guard. Grounded on original_source `algos/twap.py`.
//! [`start`] is the async driver that walks the lot schedule against the
//! order manager.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::events::{build_event, Event, EventKind, SequenceCounter};
use crate::marketdata::MarketDataFanout;
use crate::orders::manager::{OrderCallbacks, OrderManager};
use crate::orders::types::Origin;
use crate::orders::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwapStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TwapParams {
    pub symbol: String,
    pub side: Side,
    pub total_quantity: f64,
    pub num_lots: u32,
    pub interval_seconds: f64,
    pub jitter_pct: f64,
    pub irregular: bool,
    pub price_limit: Option<f64>,
    pub leverage: u32,
}

impl TwapParams {
    pub fn with_defaults(symbol: impl Into<String>, side: Side, total_quantity: f64, num_lots: u32, interval_seconds: f64, leverage: u32) -> Self {
        Self { symbol: symbol.into(), side, total_quantity, num_lots, interval_seconds, jitter_pct: 30.0, irregular: false, price_limit: None, leverage }
    }
}

/// Split `total` into `num_lots` quantities. Equal split unless `irregular`,
/// in which case weights are drawn uniformly and normalized.
pub fn lot_schedule(total: f64, num_lots: u32, irregular: bool) -> Vec<f64> {
    if num_lots == 0 {
        return Vec::new();
    }
    if !irregular {
        return vec![total / num_lots as f64; num_lots as usize];
    }
    let mut rng = rand::thread_rng();
    let weights: Vec<f64> = (0..num_lots).map(|_| rng.gen_range(0.0..1.0)).collect();
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return vec![total / num_lots as f64; num_lots as usize];
    }
    weights.iter().map(|w| total * w / sum).collect()
}

/// Jittered sleep duration for one lot interval: `interval * (1 + U(-1,1) * jitter_pct/100)`,
/// floored at 1 second.
pub fn jittered_interval_secs(interval_seconds: f64, jitter_pct: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let u: f64 = rng.gen_range(-1.0..1.0);
    (interval_seconds * (1.0 + u * jitter_pct / 100.0)).max(1.0)
}

/// Whether this lot must be skipped because the tick mid violates the price
/// limit for `side` (§4.13). A skipped lot consumes no retry and is simply
/// not filled later.
pub fn violates_price_limit(side: Side, mid: f64, price_limit: Option<f64>) -> bool {
    match (side, price_limit) {
        (Side::Buy, Some(limit)) => mid > limit,
        (Side::Sell, Some(limit)) => mid < limit,
        (_, None) => false,
    }
}

#[derive(Debug, Clone)]
pub struct TwapState {
    pub id: String,
    pub params: TwapParams,
    pub status: TwapStatus,
    pub lots: Vec<f64>,
    pub filled_lots: u32,
    pub filled_quantity: f64,
}

impl TwapState {
    pub fn new(id: impl Into<String>, params: TwapParams) -> Self {
        let lots = lot_schedule(params.total_quantity, params.num_lots, params.irregular);
        Self { id: id.into(), params, status: TwapStatus::Active, lots, filled_lots: 0, filled_quantity: 0.0 }
    }

    pub fn record_lot_fill(&mut self, lot_qty: f64) {
        self.filled_lots += 1;
        self.filled_quantity += lot_qty;
        if self.filled_lots as usize >= self.lots.len() {
            self.status = TwapStatus::Completed;
        }
    }
}

/// Spawn a TWAP run: walk the lot schedule at jittered intervals, skipping
/// any lot whose tick mid violates the price limit, placing a market order
/// per admitted lot. Runs to completion or until the caller aborts the
/// handle.
#[allow(clippy::too_many_arguments)]
pub fn start(
    manager: Arc<OrderManager>,
    fanout: Arc<MarketDataFanout>,
    seq: Arc<SequenceCounter>,
    events: UnboundedSender<Event>,
    account_id: String,
    twap_id: String,
    params: TwapParams,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = TwapState::new(twap_id.clone(), params.clone());
        let lots_total = state.lots.len() as u32;
        let _ = events.send(build_event(&seq, EventKind::TwapStarted { twap_id: twap_id.clone() }, None));

        for lot_qty in state.lots.clone() {
            let wait = jittered_interval_secs(params.interval_seconds, params.jitter_pct);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;

            if let Some(tick) = fanout.latest(&params.symbol) {
                if violates_price_limit(params.side, tick.mid, params.price_limit) {
                    continue;
                }
            }

            manager
                .place_market(&account_id, &params.symbol, params.side, lot_qty, params.leverage, Origin::Twap, Some(twap_id.clone()), false, OrderCallbacks::default())
                .await;
            state.record_lot_fill(lot_qty);
            let _ = events.send(build_event(&seq, EventKind::TwapProgress { twap_id: twap_id.clone(), lots_done: state.filled_lots, lots_total }, None));
        }

        let _ = events.send(build_event(&seq, EventKind::TwapCompleted { twap_id: twap_id.clone() }, None));
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_split_divides_evenly() {
        let lots = lot_schedule(1.0, 4, false);
        assert_eq!(lots, vec![0.25, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn irregular_split_sums_back_to_total() {
        let lots = lot_schedule(1.0, 5, true);
        let sum: f64 = lots.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(lots.len(), 5);
    }

    #[test]
    fn jittered_interval_never_goes_below_one_second() {
        for _ in 0..100 {
            let secs = jittered_interval_secs(0.5, 30.0);
            assert!(secs >= 1.0);
        }
    }

    #[test]
    fn price_limit_blocks_buy_above_and_sell_below() {
        assert!(violates_price_limit(Side::Buy, 105.0, Some(100.0)));
        assert!(!violates_price_limit(Side::Buy, 95.0, Some(100.0)));
        assert!(violates_price_limit(Side::Sell, 95.0, Some(100.0)));
        assert!(!violates_price_limit(Side::Sell, 105.0, Some(100.0)));
    }

    #[test]
    fn no_limit_never_blocks() {
        assert!(!violates_price_limit(Side::Buy, 1_000_000.0, None));
    }

    #[test]
    fn state_completes_after_all_lots_filled() {
        let mut state = TwapState::new("t1", TwapParams::with_defaults("BTCUSDT", Side::Buy, 1.0, 4, 10.0, 10));
        for _ in 0..4 {
            state.record_lot_fill(0.25);
        }
        assert_eq!(state.status, TwapStatus::Completed);
        assert_eq!(state.filled_quantity, 1.0);
    }
}
