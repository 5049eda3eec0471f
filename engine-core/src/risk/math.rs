//! Pure risk math (§4.7). No I/O, no shared state — every function is a
//! direct port of original_source `risk/math.py`.

use crate::orders::PositionSide;

pub fn pnl(side: PositionSide, entry: f64, close: f64, qty: f64) -> f64 {
    match side {
        PositionSide::Long => (close - entry) * qty,
        PositionSide::Short => (entry - close) * qty,
    }
}

/// Equity/margin summary for a single account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginSnapshot {
    pub equity: f64,
    pub maintenance_margin: f64,
    pub available_margin: f64,
}

/// `opposite_notional`/`opposite_pnl` credit an existing opposite-side
/// position on the same symbol — the validator uses this to avoid double
/// counting margin a flip-trade would free up.
pub fn available_margin(
    balance: f64,
    maint_rate: f64,
    total_upnl: f64,
    total_notional: f64,
    opposite_notional: f64,
    opposite_pnl: f64,
) -> MarginSnapshot {
    let equity = balance + total_upnl + opposite_pnl;
    let maintenance_margin = (total_notional - opposite_notional).max(0.0) * maint_rate;
    MarginSnapshot { equity, maintenance_margin, available_margin: equity - maintenance_margin }
}

/// A deliberately enormous ratio used when `equity <= 0` so callers that
/// compare against a threshold (e.g. `< 0.98`) always reject.
pub const SENTINEL_RATIO: f64 = 1.0e9;

pub fn margin_usage_ratio(equity: f64, used: f64, new: f64) -> f64 {
    if equity <= 0.0 {
        return SENTINEL_RATIO;
    }
    (used + new) / equity
}

/// Approximate liquidation price from the unrealized-loss threshold at
/// which margin is exhausted down to the maintenance floor.
pub fn approx_liquidation_price(side: PositionSide, entry: f64, qty: f64, margin: f64, maint_rate: f64) -> f64 {
    if qty <= 0.0 {
        return entry;
    }
    let loss_threshold = margin * (1.0 - maint_rate);
    let delta = loss_threshold / qty;
    match side {
        PositionSide::Long => entry - delta,
        PositionSide::Short => entry + delta,
    }
}

pub const DEFAULT_MAINT_RATE: f64 = 0.005;

/// SHA-256 over the trade's identifying fields plus a random nonce — used
/// as a dedup key for persisted trade rows, not for authentication.
pub fn trade_signature(
    account_id: &str,
    action: &str,
    position_id: &str,
    symbol: &str,
    side: PositionSide,
    qty: f64,
    timestamp_ms: u64,
) -> String {
    use sha2::{Digest, Sha256};
    let nonce: u32 = rand::random();
    let payload = format!("{account_id}|{action}|{position_id}|{symbol}|{}|{qty}|{timestamp_ms}|{nonce}", side.as_str());
    let digest = Sha256::digest(payload.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnl_long_and_short_mirror_each_other() {
        assert_eq!(pnl(PositionSide::Long, 100.0, 110.0, 2.0), 20.0);
        assert_eq!(pnl(PositionSide::Short, 100.0, 110.0, 2.0), -20.0);
    }

    #[test]
    fn available_margin_credits_the_opposite_side() {
        let snap = available_margin(1000.0, 0.005, 50.0, 2000.0, 500.0, -10.0);
        assert_eq!(snap.equity, 1040.0);
        assert_eq!(snap.maintenance_margin, 7.5);
        assert_eq!(snap.available_margin, 1032.5);
    }

    #[test]
    fn margin_usage_ratio_returns_sentinel_for_nonpositive_equity() {
        assert_eq!(margin_usage_ratio(0.0, 10.0, 5.0), SENTINEL_RATIO);
        assert_eq!(margin_usage_ratio(-5.0, 10.0, 5.0), SENTINEL_RATIO);
    }

    #[test]
    fn margin_usage_ratio_normal_case() {
        let ratio = margin_usage_ratio(1000.0, 400.0, 200.0);
        assert!((ratio - 0.6).abs() < 1e-9);
    }

    #[test]
    fn trade_signature_is_a_64_char_hex_digest_and_varies_by_nonce() {
        let a = trade_signature("acct1", "OPEN", "pos1", "BTCUSDT", PositionSide::Long, 0.01, 1000);
        let b = trade_signature("acct1", "OPEN", "pos1", "BTCUSDT", PositionSide::Long, 0.01, 1000);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b, "random nonce should make repeated signatures differ");
    }

    #[test]
    fn liquidation_price_moves_against_the_position_direction() {
        let long_liq = approx_liquidation_price(PositionSide::Long, 100.0, 1.0, 10.0, DEFAULT_MAINT_RATE);
        assert!(long_liq < 100.0);
        let short_liq = approx_liquidation_price(PositionSide::Short, 100.0, 1.0, 10.0, DEFAULT_MAINT_RATE);
        assert!(short_liq > 100.0);
    }
}
