//! Liquidation engine (§4.9): ADL-tier evaluation. Grounded on
//! original_source `risk/liquidation.py` (tier table, threshold-adjustment
//! formula — see DESIGN.md Open Question #2).

use super::position_book::{PositionBook, VirtualPosition};

/// Baseline ratio the tier thresholds are defined against; an account's own
/// `liquidation_threshold` shifts all three tiers by the same delta.
pub const BASE_ADL_THRESHOLD: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AdlTier {
    Tier1,
    Tier2,
    Tier3,
}

impl AdlTier {
    pub fn close_fraction(self) -> f64 {
        match self {
            AdlTier::Tier1 => 0.30,
            AdlTier::Tier2 => 0.50,
            AdlTier::Tier3 => 1.00,
        }
    }

    /// Only tier 3 closes every open position; tiers 1/2 close the
    /// single largest-notional position.
    pub fn closes_all_positions(self) -> bool {
        matches!(self, AdlTier::Tier3)
    }

    fn base_threshold(self) -> f64 {
        match self {
            AdlTier::Tier1 => 0.900,
            AdlTier::Tier2 => 0.925,
            AdlTier::Tier3 => 0.950,
        }
    }

    /// Threshold adjusted by how far the account's own `liquidation_threshold`
    /// sits from the 0.90 baseline, capped at the tier's own base value.
    fn adjusted_threshold(self, account_liquidation_threshold: f64) -> f64 {
        self.base_threshold().min(account_liquidation_threshold + (self.base_threshold() - BASE_ADL_THRESHOLD))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationEvaluation {
    pub tier: AdlTier,
    pub ratio: f64,
    pub positions_to_close: Vec<String>,
}

/// Given a price lookup (mid if ticked, else the position's own entry
/// price), evaluate whether the account has crossed an ADL tier. Highest
/// tier wins.
pub fn evaluate_account(book: &PositionBook, account_id: &str, price_of: impl Fn(&str) -> Option<f64>) -> Option<LiquidationEvaluation> {
    let meta = book.meta(account_id)?;
    let positions = book.positions_for_account(account_id);
    if positions.is_empty() {
        return None;
    }

    let mut total_upnl = 0.0;
    let mut total_notional = 0.0;
    for pos in &positions {
        let mark = price_of(&pos.symbol).unwrap_or(pos.entry_price);
        total_upnl += super::math::pnl(pos.side, pos.entry_price, mark, pos.quantity);
        total_notional += pos.notional();
    }

    let equity = meta.balance + total_upnl;
    let maintenance_margin = total_notional * meta.maintenance_rate;
    let ratio = maintenance_margin / equity.max(f64::EPSILON);

    for tier in [AdlTier::Tier3, AdlTier::Tier2, AdlTier::Tier1] {
        let threshold = tier.adjusted_threshold(meta.adl_threshold);
        if ratio >= threshold {
            let targets = if tier.closes_all_positions() {
                positions.iter().map(|p| p.id.clone()).collect()
            } else {
                vec![largest_by_notional(&positions)?.id.clone()]
            };
            return Some(LiquidationEvaluation { tier, ratio, positions_to_close: targets });
        }
    }
    None
}

fn largest_by_notional<'a>(positions: &[&'a VirtualPosition]) -> Option<&'a VirtualPosition> {
    positions.iter().copied().max_by(|a, b| a.notional().partial_cmp(&b.notional()).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::PositionSide;
    use crate::risk::position_book::{AccountMeta, AccountStatus, RiskRules, VirtualPosition};

    fn book_with_position(balance: f64, entry: f64, qty: f64, leverage: u32, adl_threshold: f64) -> PositionBook {
        let mut book = PositionBook::new();
        book.load_account(
            "acct1",
            AccountMeta { balance, maintenance_rate: 0.005, adl_threshold, status: AccountStatus::Active },
            vec![],
            RiskRules::default(),
        );
        book.add(VirtualPosition::new("p1", "acct1", "BTCUSDT", PositionSide::Long, entry, qty, leverage));
        book
    }

    #[test]
    fn no_liquidation_when_ratio_below_all_tiers() {
        let book = book_with_position(10_000.0, 100.0, 1.0, 10, 0.90);
        let eval = evaluate_account(&book, "acct1", |_| Some(100.0));
        assert!(eval.is_none());
    }

    #[test]
    fn tier1_triggers_at_0_90_and_closes_largest_only() {
        // notional=100, maint_rate=0.005 -> maintenance_margin=0.5
        // need ratio >= 0.90 => equity <= 0.5/0.90 ≈ 0.5556
        let book = book_with_position(0.5556, 100.0, 1.0, 10, 0.90);
        let eval = evaluate_account(&book, "acct1", |_| Some(100.0)).expect("should trigger");
        assert_eq!(eval.tier, AdlTier::Tier1);
        assert_eq!(eval.positions_to_close, vec!["p1".to_string()]);
    }

    #[test]
    fn tier3_closes_all_open_positions() {
        let mut book = book_with_position(0.1, 100.0, 1.0, 10, 0.90);
        book.add(VirtualPosition::new("p2", "acct1", "ETHUSDT", PositionSide::Long, 50.0, 1.0, 10));
        let eval = evaluate_account(&book, "acct1", |_| Some(50.0)).expect("should trigger");
        assert_eq!(eval.tier, AdlTier::Tier3);
        assert_eq!(eval.positions_to_close.len(), 2);
    }

    #[test]
    fn account_liquidation_threshold_shifts_tier_boundaries() {
        // Account's own threshold is lower than baseline -> tiers trigger earlier.
        let book = book_with_position(5.0, 100.0, 1.0, 10, 0.80);
        let eval = evaluate_account(&book, "acct1", |_| Some(100.0));
        // maintenance_margin=0.5, equity=5.0 -> ratio=0.10, well below any adjusted tier.
        assert!(eval.is_none());
    }
}
