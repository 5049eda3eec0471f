//! Chase algorithm (§4.11): one order tracking BBO under a repricing policy.
//! Grounded on original_source `algos/chase.py` (reprice/guard/fill/cancel
//! logic, ported near 1:1). [`start`] is the async driver: it owns the
//! order manager calls and the market-data poll the pure functions above
//! don't make themselves.

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
pub enum StalkMode {
    None,
    Maintain,
    Trail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaseStatus {
    Active,
    Filled,
    Cancelled,
}

const REPRICE_THROTTLE_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ChaseParams {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub leverage: u32,
    pub stalk_mode: StalkMode,
    pub stalk_offset_pct: f64,
    pub max_distance_pct: f64,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct ChaseState {
    pub id: String,
    pub params: ChaseParams,
    pub status: ChaseStatus,
    pub initial_price: f64,
    pub current_order_id: Option<String>,
    pub reprice_count: u32,
    pub last_reprice_at: u64,
    /// Engine-initiated cancel in flight — an external cancel event for
    /// this order must not trigger re-arm while this is set.
    pub own_cancel_pending: bool,
}

impl ChaseState {
    pub fn new(id: impl Into<String>, params: ChaseParams, initial_price: f64, order_id: String, now: u64) -> Self {
        Self {
            id: id.into(),
            params,
            status: ChaseStatus::Active,
            initial_price,
            current_order_id: Some(order_id),
            reprice_count: 0,
            last_reprice_at: now,
            own_cancel_pending: false,
        }
    }
}

/// The chase price function (§4.11, pure): 0 offset joins the touch;
/// positive offset sits passively behind it.
pub fn chase_price(side: Side, bid: f64, ask: f64, offset_pct: f64) -> f64 {
    match side {
        Side::Buy => bid * (1.0 - offset_pct / 100.0),
        Side::Sell => ask * (1.0 + offset_pct / 100.0),
    }
}

/// Truth table (§4.11): does the mode call for a reprice on this move?
pub fn should_reprice_for_mode(mode: StalkMode, side: Side, old_mid: f64, new_mid: f64) -> bool {
    match mode {
        StalkMode::None => false,
        StalkMode::Maintain => new_mid != old_mid,
        StalkMode::Trail => match side {
            Side::Buy => new_mid < old_mid,  // ratchet lower only
            Side::Sell => new_mid > old_mid, // ratchet higher only
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickDecision {
    NoAction,
    CancelMaxDistance,
    Reprice { new_price: f64 },
}

/// Evaluate one L1 tick against the three ordered guards (§4.11).
pub fn evaluate_tick(state: &ChaseState, bid: f64, ask: f64, old_mid: f64, now: u64) -> TickDecision {
    let new_mid = (bid + ask) / 2.0;

    let distance_pct = (new_mid - state.initial_price).abs() / state.initial_price * 100.0;
    if state.params.max_distance_pct > 0.0 && distance_pct > state.params.max_distance_pct {
        return TickDecision::CancelMaxDistance;
    }

    if now.saturating_sub(state.last_reprice_at) < REPRICE_THROTTLE_MS {
        return TickDecision::NoAction;
    }

    if !should_reprice_for_mode(state.params.stalk_mode, state.params.side, old_mid, new_mid) {
        return TickDecision::NoAction;
    }

    TickDecision::Reprice { new_price: chase_price(state.params.side, bid, ask, state.params.stalk_offset_pct) }
}

const POLL_INTERVAL_MS: u64 = 100;

/// Spawn a chase instance: place the initial order, then poll the market
/// and the order's own status, repricing or cancelling per
/// [`evaluate_tick`] until the order fills or is cancelled. Returns `None`
/// if there is no quote yet to anchor the initial price to.
#[allow(clippy::too_many_arguments)]
pub fn start(
    manager: Arc<OrderManager>,
    fanout: Arc<MarketDataFanout>,
    seq: Arc<SequenceCounter>,
    events: UnboundedSender<Event>,
    account_id: String,
    chase_id: String,
    params: ChaseParams,
) -> Option<JoinHandle<()>> {
    let quote = fanout.latest(&params.symbol)?;
    let initial_price = chase_price(params.side, quote.bid, quote.ask, params.stalk_offset_pct);

    Some(tokio::spawn(async move {
        let order = manager
            .place_limit(&account_id, &params.symbol, params.side, params.quantity, initial_price, params.leverage, Origin::Chase, Some(chase_id.clone()), params.reduce_only, OrderCallbacks::default())
            .await;
        let mut current_id = order.client_order_id.clone();
        let mut state = ChaseState::new(chase_id.clone(), params.clone(), initial_price, current_id.clone(), now_ms());
        let _ = events.send(build_event(&seq, EventKind::ChaseStarted { chase_id: chase_id.clone() }, None));
        let mut old_mid = (quote.bid + quote.ask) / 2.0;

        loop {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;

            let Some(order_now) = manager.order(&current_id).await else { break };
            if order_now.status.is_terminal() {
                if order_now.status == OrderStatus::Filled {
                    state.status = ChaseStatus::Filled;
                    let _ = events.send(build_event(&seq, EventKind::ChaseFilled { chase_id: chase_id.clone() }, None));
                } else if !state.own_cancel_pending {
                    state.status = ChaseStatus::Cancelled;
                    let _ = events.send(build_event(&seq, EventKind::ChaseCancelled { chase_id: chase_id.clone(), reason: "order left the book".into() }, None));
                }
                break;
            }

            let Some(tick) = fanout.latest(&params.symbol) else { continue };
            let now = now_ms();
            match evaluate_tick(&state, tick.bid, tick.ask, old_mid, now) {
                TickDecision::NoAction => {}
                TickDecision::CancelMaxDistance => {
                    state.own_cancel_pending = true;
                    manager.cancel(&current_id).await;
                    state.status = ChaseStatus::Cancelled;
                    let _ = events.send(build_event(&seq, EventKind::ChaseCancelled { chase_id: chase_id.clone(), reason: "max distance exceeded".into() }, None));
                    break;
                }
                TickDecision::Reprice { new_price } => {
                    if let Some(replaced) = manager.replace(&current_id, new_price, None).await {
                        current_id = replaced.client_order_id.clone();
                        state.current_order_id = Some(current_id.clone());
                        state.reprice_count += 1;
                        state.last_reprice_at = now;
                        let _ = events.send(build_event(&seq, EventKind::ChaseProgress { chase_id: chase_id.clone(), reprices: state.reprice_count }, None));
                    }
                }
            }
            old_mid = (tick.bid + tick.ask) / 2.0;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(side: Side, mode: StalkMode, max_distance_pct: f64) -> ChaseParams {
        ChaseParams { symbol: "BTCUSDT".into(), side, quantity: 0.01, leverage: 10, stalk_mode: mode, stalk_offset_pct: 0.0, max_distance_pct, reduce_only: false }
    }

    #[test]
    fn chase_price_zero_offset_joins_the_touch() {
        assert_eq!(chase_price(Side::Buy, 100.0, 101.0, 0.0), 100.0);
        assert_eq!(chase_price(Side::Sell, 100.0, 101.0, 0.0), 101.0);
    }

    #[test]
    fn chase_price_positive_offset_is_passive() {
        let buy_price = chase_price(Side::Buy, 100.0, 101.0, 1.0);
        assert!(buy_price < 100.0);
        let sell_price = chase_price(Side::Sell, 100.0, 101.0, 1.0);
        assert!(sell_price > 101.0);
    }

    #[test]
    fn mode_none_never_reprices() {
        assert!(!should_reprice_for_mode(StalkMode::None, Side::Buy, 100.0, 105.0));
        assert!(!should_reprice_for_mode(StalkMode::None, Side::Buy, 100.0, 95.0));
    }

    #[test]
    fn mode_maintain_reprices_on_any_move() {
        assert!(should_reprice_for_mode(StalkMode::Maintain, Side::Buy, 100.0, 105.0));
        assert!(should_reprice_for_mode(StalkMode::Maintain, Side::Buy, 100.0, 95.0));
    }

    #[test]
    fn mode_trail_buy_only_ratchets_lower() {
        assert!(should_reprice_for_mode(StalkMode::Trail, Side::Buy, 100.0, 95.0));
        assert!(!should_reprice_for_mode(StalkMode::Trail, Side::Buy, 100.0, 105.0));
    }

    #[test]
    fn mode_trail_sell_only_ratchets_higher() {
        assert!(should_reprice_for_mode(StalkMode::Trail, Side::Sell, 100.0, 105.0));
        assert!(!should_reprice_for_mode(StalkMode::Trail, Side::Sell, 100.0, 95.0));
    }

    #[test]
    fn max_distance_guard_fires_before_reprice_decision() {
        let state = ChaseState::new("c1", params(Side::Buy, StalkMode::Maintain, 1.0), 100.0, "o1".into(), 0);
        let decision = evaluate_tick(&state, 102.0, 102.1, 100.0, 10_000);
        assert_eq!(decision, TickDecision::CancelMaxDistance);
    }

    #[test]
    fn throttle_blocks_reprice_within_500ms() {
        let state = ChaseState::new("c1", params(Side::Buy, StalkMode::Maintain, 0.0), 100.0, "o1".into(), 1000);
        let decision = evaluate_tick(&state, 99.0, 99.1, 100.0, 1200);
        assert_eq!(decision, TickDecision::NoAction);
    }

    #[test]
    fn reprice_fires_when_all_guards_clear() {
        let state = ChaseState::new("c1", params(Side::Buy, StalkMode::Maintain, 0.0), 100.0, "o1".into(), 0);
        let decision = evaluate_tick(&state, 99.0, 99.2, 100.0, 1000);
        assert!(matches!(decision, TickDecision::Reprice { .. }));
    }
}
