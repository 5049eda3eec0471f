//! Trail-stop algorithm (§4.14): HWM/LWM tracker with reduce-only close on
//! retrace. Grounded on original_source `algos/trail_stop.py`. [`start`] is
//! the async driver that polls the market and fires the closing order
//! through the order manager on trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::events::{build_event, Event, EventKind, SequenceCounter};
use crate::marketdata::MarketDataFanout;
use crate::orders::manager::{OrderCallbacks, OrderManager};
use crate::orders::types::Origin;
use crate::orders::{PositionSide, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailStopStatus {
    Active,
    Triggered,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TrailStopParams {
    pub symbol: String,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub leverage: u32,
    pub trail_pct: f64,
    pub activation_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TrailStopState {
    pub id: String,
    pub params: TrailStopParams,
    pub status: TrailStopStatus,
    pub extreme_price: f64,
    pub trigger_price: f64,
    pub activated: bool,
}

impl TrailStopState {
    pub fn new(id: impl Into<String>, params: TrailStopParams) -> Self {
        let activated = params.activation_price.is_none();
        Self { id: id.into(), status: TrailStopStatus::Active, extreme_price: 0.0, trigger_price: 0.0, activated, params }
    }

    /// Closing order side: `sell` closes a long, `buy` closes a short.
    pub fn closing_side(&self) -> Side {
        self.params.position_side.closing_side()
    }

    fn recompute_trigger(&mut self) {
        self.trigger_price = match self.params.position_side {
            PositionSide::Long => self.extreme_price * (1.0 - self.params.trail_pct / 100.0),
            PositionSide::Short => self.extreme_price * (1.0 + self.params.trail_pct / 100.0),
        };
    }

    /// Feed one tick through activation -> watermark -> trigger. Returns
    /// `true` exactly once, on the tick that crosses the trigger.
    pub fn on_tick(&mut self, mid: f64) -> bool {
        if self.status != TrailStopStatus::Active {
            return false;
        }

        if !self.activated {
            let should_activate = match (self.params.position_side, self.params.activation_price) {
                (PositionSide::Long, Some(ap)) => mid >= ap,
                (PositionSide::Short, Some(ap)) => mid <= ap,
                (_, None) => true,
            };
            if !should_activate {
                return false;
            }
            self.activated = true;
            self.extreme_price = mid;
            self.recompute_trigger();
            return false;
        }

        let watermark_changed = match self.params.position_side {
            PositionSide::Long => {
                if mid > self.extreme_price {
                    self.extreme_price = mid;
                    true
                } else {
                    false
                }
            }
            PositionSide::Short => {
                if mid < self.extreme_price {
                    self.extreme_price = mid;
                    true
                } else {
                    false
                }
            }
        };
        if watermark_changed {
            self.recompute_trigger();
        }

        let triggered = match self.params.position_side {
            PositionSide::Long => mid <= self.trigger_price,
            PositionSide::Short => mid >= self.trigger_price,
        };
        if triggered {
            self.status = TrailStopStatus::Triggered;
        }
        triggered
    }
}

const POLL_INTERVAL_MS: u64 = 200;

/// Spawn a trail-stop watcher: poll the market until [`TrailStopState::on_tick`]
/// reports the trigger crossed, then fire one reduce-only closing order.
/// Returns `None` if there is no quote yet to seed tracking with.
pub fn start(
    manager: Arc<OrderManager>,
    fanout: Arc<MarketDataFanout>,
    seq: Arc<SequenceCounter>,
    events: UnboundedSender<Event>,
    account_id: String,
    trail_stop_id: String,
    params: TrailStopParams,
) -> Option<JoinHandle<()>> {
    fanout.latest(&params.symbol)?;

    Some(tokio::spawn(async move {
        let mut state = TrailStopState::new(trail_stop_id.clone(), params.clone());
        let _ = events.send(build_event(&seq, EventKind::TrailStopStarted { trail_stop_id: trail_stop_id.clone() }, None));

        loop {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            let Some(quote) = fanout.latest(&params.symbol) else { continue };
            if state.on_tick(quote.mid) {
                manager
                    .place_market(&account_id, &params.symbol, state.closing_side(), params.quantity, params.leverage, Origin::TrailStop, Some(trail_stop_id.clone()), true, OrderCallbacks::default())
                    .await;
                let _ = events.send(build_event(&seq, EventKind::TrailStopTriggered { trail_stop_id: trail_stop_id.clone() }, None));
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(side: PositionSide, trail_pct: f64, activation: Option<f64>) -> TrailStopParams {
        TrailStopParams { symbol: "BTCUSDT".into(), position_side: side, quantity: 0.01, leverage: 10, trail_pct, activation_price: activation }
    }

    #[test]
    fn activates_immediately_without_activation_price() {
        let state = TrailStopState::new("t1", params(PositionSide::Long, 1.0, None));
        assert!(state.activated);
    }

    #[test]
    fn long_waits_for_activation_price_before_tracking() {
        let mut state = TrailStopState::new("t1", params(PositionSide::Long, 1.0, Some(110.0)));
        assert!(!state.on_tick(105.0));
        assert!(!state.activated);
        assert!(!state.on_tick(110.0));
        assert!(state.activated);
        assert_eq!(state.extreme_price, 110.0);
    }

    #[test]
    fn long_ratchets_watermark_up_and_triggers_on_retrace() {
        let mut state = TrailStopState::new("t1", params(PositionSide::Long, 2.0, None));
        state.on_tick(100.0); // seeds extreme at first tick
        assert!(!state.on_tick(110.0));
        assert_eq!(state.extreme_price, 110.0);
        // trigger = 110 * 0.98 = 107.8
        assert!(!state.on_tick(108.0));
        assert!(state.on_tick(107.5));
        assert_eq!(state.status, TrailStopStatus::Triggered);
    }

    #[test]
    fn short_ratchets_watermark_down_and_triggers_on_retrace() {
        let mut state = TrailStopState::new("t1", params(PositionSide::Short, 2.0, None));
        state.on_tick(100.0);
        assert!(!state.on_tick(90.0));
        assert_eq!(state.extreme_price, 90.0);
        // trigger = 90 * 1.02 = 91.8
        assert!(state.on_tick(92.0));
    }

    #[test]
    fn closing_side_is_opposite_of_position_side() {
        let long_state = TrailStopState::new("t1", params(PositionSide::Long, 1.0, None));
        assert_eq!(long_state.closing_side(), Side::Sell);
        let short_state = TrailStopState::new("t2", params(PositionSide::Short, 1.0, None));
        assert_eq!(short_state.closing_side(), Side::Buy);
    }

    #[test]
    fn already_triggered_state_ignores_further_ticks() {
        let mut state = TrailStopState::new("t1", params(PositionSide::Long, 2.0, None));
        state.on_tick(100.0);
        state.on_tick(110.0);
        assert!(state.on_tick(107.0));
        assert!(!state.on_tick(50.0), "triggered state must not re-trigger");
    }
}
