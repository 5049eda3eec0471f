//! Scalper algorithm (§4.12): a grid of limit-order legs laddered across
//! `layer_offsets`, each re-armed after its own guard ladder clears.
//! Grounded on original_source `algos/scalper.py` — the layer-geometry
//! formulas and restart guard ladder are ported 1:1. [`start`] is the
//! async driver that lays the initial grid and polls each leg via the
//! order manager, re-placing a leg once its guards admit it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::events::{build_event, Event, EventKind, SequenceCounter};
use crate::marketdata::MarketDataFanout;
use crate::orders::manager::{OrderCallbacks, OrderManager};
use crate::orders::types::{now_ms, OrderStatus, Origin};
use crate::orders::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSide {
    Long,
    Short,
}

impl StartSide {
    /// The order side that opens this leg.
    pub fn opening_side(self) -> Side {
        match self {
            StartSide::Long => Side::Buy,
            StartSide::Short => Side::Sell,
        }
    }
}

const MAX_SPREAD: f64 = 2.0;

/// Offsets centered on `base`, exponentially spread across `count` layers
/// (§4.12). Single-layer case returns `[base]`.
pub fn layer_offsets(base: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![base];
    }
    let step = MAX_SPREAD.ln() / (count - 1) as f64;
    (0..count).map(|i| base * (-MAX_SPREAD.ln() / 2.0 + step * i as f64).exp()).collect()
}

/// Skew-weighted size weights, normalized to sum to 1. Positive skew loads
/// further-out layers; 0 skew is uniform.
pub fn layer_weights(skew: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![1.0];
    }
    let raw: Vec<f64> = (0..count)
        .map(|i| {
            let frac = 2.0 * (i as f64 / (count - 1) as f64) - 1.0;
            8f64.powf((skew / 100.0) * frac)
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|w| w / sum).collect()
}

pub fn layer_quantity(size_usd: f64, weight: f64, current_price: f64) -> f64 {
    if current_price <= 0.0 {
        return 0.0;
    }
    size_usd * weight / current_price
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    FillSpread,
    BurstLimit,
    RefillDelay,
    PriceFilter,
}

#[derive(Debug, Clone)]
pub struct SlotState {
    pub layer_index: usize,
    pub side: Side,
    pub qty: f64,
    pub offset_pct: f64,
    pub reduce_only: bool,
    pub owned_chase_id: Option<String>,
    pub active: bool,
    pub paused_reason: Option<PauseReason>,
    pub retry_at: u64,
    pub retry_count: u32,
    pub fill_count: u32,
}

impl SlotState {
    pub fn new(layer_index: usize, side: Side, qty: f64, offset_pct: f64, reduce_only: bool) -> Self {
        Self { layer_index, side, qty, offset_pct, reduce_only, owned_chase_id: None, active: false, paused_reason: None, retry_at: 0, retry_count: 0, fill_count: 0 }
    }
}

/// Slots whose notional is below the exchange minimum are skipped entirely
/// rather than placed and immediately rejected.
pub fn should_skip_slot(qty: f64, current_price: f64, min_notional_usd: f64) -> bool {
    qty * current_price < min_notional_usd
}

/// Guard 1 — fill spread: price must have moved by at least
/// `min_spread_pct * 0.5^(elapsed/half_life)` from the last same-side fill.
pub fn admits_by_fill_spread(last_fill_price: f64, candidate_price: f64, min_spread_pct: f64, elapsed_ms: u64, half_life_ms: u64) -> bool {
    if half_life_ms == 0 {
        return true;
    }
    let decayed_pct = min_spread_pct * 0.5f64.powf(elapsed_ms as f64 / half_life_ms as f64);
    let moved_pct = (candidate_price - last_fill_price).abs() / last_fill_price * 100.0;
    moved_pct >= decayed_pct
}

/// Guard 2 — burst: at most `max_fills_per_minute` fills in the trailing
/// 60-second window per leg side.
pub fn admits_by_burst(fill_timestamps_ms: &[u64], now_ms: u64, max_fills_per_minute: u32) -> bool {
    let window_start = now_ms.saturating_sub(60_000);
    let recent = fill_timestamps_ms.iter().filter(|&&t| t >= window_start).count();
    (recent as u32) < max_fills_per_minute
}

/// Guard 3 — refill delay: `min_refill_delay_ms * 2^min(count,4)`.
pub fn refill_delay_ms(min_refill_delay_ms: u64, retry_count: u32) -> u64 {
    min_refill_delay_ms * (1u64 << retry_count.min(4))
}

/// Guard 4 — price band: `buy` requires `mid <= long_max_price` if set;
/// `sell` requires `mid >= short_min_price` if set.
pub fn admits_by_price_band(side: Side, mid: f64, long_max_price: Option<f64>, short_min_price: Option<f64>) -> bool {
    match side {
        Side::Buy => long_max_price.map(|cap| mid <= cap).unwrap_or(true),
        Side::Sell => short_min_price.map(|floor| mid >= floor).unwrap_or(true),
    }
}

/// Place-failure backoff: `min(2 * 2^(retry-1), 300)` seconds.
pub fn place_failure_backoff_secs(retry: u32) -> f64 {
    if retry == 0 {
        return 0.0;
    }
    (2.0 * 2f64.powi(retry as i32 - 1)).min(300.0)
}

/// Per-symbol knobs for a running grid; one leg is laid per layer.
#[derive(Debug, Clone)]
pub struct ScalperParams {
    pub symbol: String,
    pub start_side: StartSide,
    pub num_layers: usize,
    pub base_offset_pct: f64,
    pub skew: f64,
    pub size_usd: f64,
    pub leverage: u32,
    pub reduce_only: bool,
    pub min_notional_usd: f64,
    pub min_spread_pct: f64,
    pub half_life_ms: u64,
    pub max_fills_per_minute: u32,
    pub min_refill_delay_ms: u64,
    pub long_max_price: Option<f64>,
    pub short_min_price: Option<f64>,
}

fn layer_price(side: Side, mid: f64, offset_pct: f64) -> f64 {
    match side {
        Side::Buy => mid * (1.0 - offset_pct / 100.0),
        Side::Sell => mid * (1.0 + offset_pct / 100.0),
    }
}

/// Driver-owned bookkeeping for one grid leg; wraps the pure [`SlotState`]
/// with the order id and fill history the guard functions need.
struct Slot {
    state: SlotState,
    order_id: Option<String>,
    last_fill_price: Option<f64>,
    fill_timestamps_ms: Vec<u64>,
}

const POLL_INTERVAL_MS: u64 = 250;

/// Spawn a scalper grid: lay one limit order per layer, then poll each leg
/// and re-arm it once its guard ladder (spread / burst / refill delay /
/// price band) admits a new fill. Runs until the caller aborts the handle.
/// Returns `None` if there is no quote yet to anchor the grid to.
pub fn start(
    manager: Arc<OrderManager>,
    fanout: Arc<MarketDataFanout>,
    seq: Arc<SequenceCounter>,
    events: UnboundedSender<Event>,
    account_id: String,
    scalper_id: String,
    params: ScalperParams,
) -> Option<JoinHandle<()>> {
    let quote = fanout.latest(&params.symbol)?;
    let side = params.start_side.opening_side();
    let offsets = layer_offsets(params.base_offset_pct, params.num_layers);
    let weights = layer_weights(params.skew, params.num_layers);

    Some(tokio::spawn(async move {
        let mut slots: Vec<Slot> = Vec::with_capacity(offsets.len());
        for (i, (offset, weight)) in offsets.iter().zip(weights.iter()).enumerate() {
            let price = layer_price(side, quote.mid, *offset);
            let qty = layer_quantity(params.size_usd, *weight, price);
            let mut state = SlotState::new(i, side, qty, *offset, params.reduce_only);
            if should_skip_slot(qty, price, params.min_notional_usd) {
                slots.push(Slot { state, order_id: None, last_fill_price: None, fill_timestamps_ms: Vec::new() });
                continue;
            }
            let order =
                manager.place_limit(&account_id, &params.symbol, side, qty, price, params.leverage, Origin::Scalper, Some(scalper_id.clone()), params.reduce_only, OrderCallbacks::default()).await;
            state.active = true;
            slots.push(Slot { state, order_id: Some(order.client_order_id), last_fill_price: None, fill_timestamps_ms: Vec::new() });
        }

        loop {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            let Some(quote) = fanout.latest(&params.symbol) else { continue };
            let now = now_ms();
            let mut filled_legs = 0u32;

            for slot in slots.iter_mut() {
                if slot.state.active {
                    let Some(order_id) = slot.order_id.clone() else { continue };
                    let Some(order) = manager.order(&order_id).await else { continue };
                    if order.status == OrderStatus::Filled {
                        slot.state.active = false;
                        slot.state.fill_count += 1;
                        slot.last_fill_price = Some(order.avg_fill_price);
                        slot.fill_timestamps_ms.push(now);
                        slot.state.retry_at = now + refill_delay_ms(params.min_refill_delay_ms, slot.state.retry_count);
                        filled_legs += 1;
                    } else if order.status.is_terminal() {
                        slot.state.active = false;
                        slot.state.retry_at = now;
                    }
                    continue;
                }

                if now < slot.state.retry_at {
                    continue;
                }
                if !admits_by_price_band(side, quote.mid, params.long_max_price, params.short_min_price) {
                    slot.state.paused_reason = Some(PauseReason::PriceFilter);
                    continue;
                }
                if !admits_by_burst(&slot.fill_timestamps_ms, now, params.max_fills_per_minute) {
                    slot.state.paused_reason = Some(PauseReason::BurstLimit);
                    continue;
                }
                let price = layer_price(side, quote.mid, slot.state.offset_pct);
                if let Some(last_price) = slot.last_fill_price {
                    let elapsed = now.saturating_sub(slot.fill_timestamps_ms.last().copied().unwrap_or(now));
                    if !admits_by_fill_spread(last_price, price, params.min_spread_pct, elapsed, params.half_life_ms) {
                        slot.state.paused_reason = Some(PauseReason::FillSpread);
                        continue;
                    }
                }
                if should_skip_slot(slot.state.qty, price, params.min_notional_usd) {
                    continue;
                }
                slot.state.paused_reason = None;
                let order = manager
                    .place_limit(&account_id, &params.symbol, side, slot.state.qty, price, params.leverage, Origin::Scalper, Some(scalper_id.clone()), params.reduce_only, OrderCallbacks::default())
                    .await;
                slot.order_id = Some(order.client_order_id);
                slot.state.active = true;
                slot.state.retry_count += 1;
            }

            if filled_legs > 0 {
                let _ = events.send(build_event(&seq, EventKind::ScalperProgress { scalper_id: scalper_id.clone(), filled_legs }, None));
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_layer_returns_base_unchanged() {
        assert_eq!(layer_offsets(1.0, 1), vec![1.0]);
        assert_eq!(layer_weights(25.0, 1), vec![1.0]);
    }

    #[test]
    fn layer_offsets_are_symmetric_around_base_for_three_layers() {
        let offsets = layer_offsets(1.0, 3);
        assert_eq!(offsets.len(), 3);
        // step = ln(2)/2, offsets = base*exp(-ln2/2 + step*i) for i=0,1,2
        // middle layer (i=1) should equal base exactly.
        assert!((offsets[1] - 1.0).abs() < 1e-9);
        assert!(offsets[0] < offsets[1]);
        assert!(offsets[2] > offsets[1]);
    }

    #[test]
    fn layer_weights_sum_to_one() {
        let weights = layer_weights(40.0, 5);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_skew_is_uniform() {
        let weights = layer_weights(0.0, 4);
        for w in &weights {
            assert!((w - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn positive_skew_loads_further_out_layers() {
        let weights = layer_weights(50.0, 3);
        assert!(weights[2] > weights[0]);
    }

    #[test]
    fn should_skip_slot_below_min_notional() {
        assert!(should_skip_slot(0.0001, 50_000.0, 5.0));
        assert!(!should_skip_slot(0.001, 50_000.0, 5.0));
    }

    #[test]
    fn fill_spread_guard_decays_over_time() {
        // At t=0, need the full min_spread (1%); price only moved 0.5%.
        assert!(!admits_by_fill_spread(100.0, 100.5, 1.0, 0, 60_000));
        // After one half-life, the required spread halves to 0.5%, so 0.5% admits.
        assert!(admits_by_fill_spread(100.0, 100.5, 1.0, 60_000, 60_000));
    }

    #[test]
    fn burst_guard_blocks_once_limit_reached_in_window() {
        let fills = vec![1_000, 2_000, 3_000];
        assert!(!admits_by_burst(&fills, 10_000, 3));
        assert!(admits_by_burst(&fills, 10_000, 4));
    }

    #[test]
    fn refill_delay_grows_and_caps_at_count_four() {
        assert_eq!(refill_delay_ms(1000, 0), 1000);
        assert_eq!(refill_delay_ms(1000, 1), 2000);
        assert_eq!(refill_delay_ms(1000, 4), 16000);
        assert_eq!(refill_delay_ms(1000, 10), 16000);
    }

    #[test]
    fn price_band_blocks_outside_configured_range() {
        assert!(!admits_by_price_band(Side::Buy, 101.0, Some(100.0), None));
        assert!(admits_by_price_band(Side::Buy, 99.0, Some(100.0), None));
        assert!(!admits_by_price_band(Side::Sell, 99.0, None, Some(100.0)));
    }

    #[test]
    fn place_failure_backoff_doubles_then_caps() {
        assert_eq!(place_failure_backoff_secs(0), 0.0);
        assert_eq!(place_failure_backoff_secs(1), 2.0);
        assert_eq!(place_failure_backoff_secs(2), 4.0);
        assert!(place_failure_backoff_secs(20) <= 300.0);
    }
}
