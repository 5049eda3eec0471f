//! Pre-trade validator (§4.8): seven checks, all evaluated and accumulated
//! rather than short-circuited, so a caller sees every reason a trade would
//! be rejected in one round trip. Grounded on original_source
//! `risk/validator.py` (check order, default rules, 0.98 margin-usage cap).

use super::math::{available_margin, margin_usage_ratio};
use super::position_book::{AccountStatus, PositionBook};
use crate::orders::PositionSide;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    AccountNotFound,
    AccountNotActive,
    PriceUnavailable,
    LeverageExceeded,
    NotionalExceeded,
    ExposureExceeded,
    InsufficientMargin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    pub notional: f64,
    pub margin_required: f64,
    pub margin_usage_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationErrorKind>,
    pub computed: Computed,
}

const MARGIN_USAGE_REJECT_THRESHOLD: f64 = 0.98;

/// `price` is the current mark/mid for `symbol`, already resolved by the
/// caller from the market-data fan-out (`None` if no tick has arrived).
pub fn validate(
    book: &PositionBook,
    account_id: &str,
    symbol: &str,
    side_to_open: PositionSide,
    quantity: f64,
    leverage: u32,
    price: Option<f64>,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut computed = Computed { notional: 0.0, margin_required: 0.0, margin_usage_ratio: None };

    // 1. Account exists.
    let Some(meta) = book.meta(account_id) else {
        errors.push(ValidationErrorKind::AccountNotFound);
        return ValidationResult { valid: false, errors, computed };
    };

    // 2. Account active.
    if meta.status != AccountStatus::Active {
        errors.push(ValidationErrorKind::AccountNotActive);
    }

    // 3. Price available.
    let Some(price) = price else {
        errors.push(ValidationErrorKind::PriceUnavailable);
        // Nothing downstream can be computed without a price.
        return ValidationResult { valid: errors.is_empty(), errors, computed };
    };

    let rules = book.rules(account_id);

    // 4. Leverage within limit.
    if leverage > rules.max_leverage {
        errors.push(ValidationErrorKind::LeverageExceeded);
    }

    let notional = quantity * price;
    computed.notional = notional;

    // 5. Notional per trade within limit.
    if notional > rules.max_notional_per_trade {
        errors.push(ValidationErrorKind::NotionalExceeded);
    }

    let opposite = book.find_position(account_id, symbol, side_to_open.opposite());
    let opposite_notional = opposite.map(|p| p.notional()).unwrap_or(0.0);
    let opposite_pnl = opposite.map(|p| p.unrealized_pnl).unwrap_or(0.0);

    let existing_notional: f64 = book.positions_for_account(account_id).iter().map(|p| p.notional()).sum();
    let net_exposure = existing_notional - opposite_notional + notional;

    // 6. Net exposure (credited for an opposite position) within limit.
    if net_exposure > rules.max_total_exposure {
        errors.push(ValidationErrorKind::ExposureExceeded);
    }

    // 7. Available margin covers the trade, and resulting usage ratio is
    //    below the reject threshold.
    let total_upnl: f64 = book.positions_for_account(account_id).iter().map(|p| p.unrealized_pnl).sum();
    let total_notional: f64 = book.positions_for_account(account_id).iter().map(|p| p.notional()).sum();
    let margin_snapshot = available_margin(meta.balance, meta.maintenance_rate, total_upnl, total_notional, opposite_notional, opposite_pnl);

    let margin_required = notional / leverage.max(1) as f64;
    computed.margin_required = margin_required;

    let used_margin: f64 = book
        .positions_for_account(account_id)
        .iter()
        .filter(|p| p.symbol != symbol || p.side != side_to_open.opposite())
        .map(|p| p.margin())
        .sum();
    let ratio = margin_usage_ratio(margin_snapshot.equity, used_margin, margin_required);
    computed.margin_usage_ratio = Some(ratio);

    if margin_snapshot.available_margin < margin_required || ratio >= MARGIN_USAGE_REJECT_THRESHOLD {
        errors.push(ValidationErrorKind::InsufficientMargin);
    }

    ValidationResult { valid: errors.is_empty(), errors, computed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::position_book::{AccountMeta, RiskRules};

    fn book_with_account(balance: f64, rules: RiskRules) -> PositionBook {
        let mut book = PositionBook::new();
        book.load_account("acct1", AccountMeta { balance, ..Default::default() }, vec![], rules);
        book
    }

    #[test]
    fn unknown_account_short_circuits_with_single_error() {
        let book = PositionBook::new();
        let result = validate(&book, "ghost", "BTCUSDT", PositionSide::Long, 0.01, 10, Some(100.0));
        assert!(!result.valid);
        assert_eq!(result.errors, vec![ValidationErrorKind::AccountNotFound]);
    }

    #[test]
    fn missing_price_is_reported_alone() {
        let book = book_with_account(1000.0, RiskRules::default());
        let result = validate(&book, "acct1", "BTCUSDT", PositionSide::Long, 0.01, 10, None);
        assert_eq!(result.errors, vec![ValidationErrorKind::PriceUnavailable]);
    }

    #[test]
    fn accumulates_leverage_and_notional_violations_together() {
        let rules = RiskRules { max_leverage: 5, max_notional_per_trade: 50.0, ..Default::default() };
        let book = book_with_account(1000.0, rules);
        let result = validate(&book, "acct1", "BTCUSDT", PositionSide::Long, 1.0, 10, Some(100.0));
        assert!(result.errors.contains(&ValidationErrorKind::LeverageExceeded));
        assert!(result.errors.contains(&ValidationErrorKind::NotionalExceeded));
    }

    #[test]
    fn passes_when_all_checks_clear() {
        let book = book_with_account(10_000.0, RiskRules::default());
        let result = validate(&book, "acct1", "BTCUSDT", PositionSide::Long, 0.01, 10, Some(100.0));
        assert!(result.valid, "{:?}", result.errors);
    }
}
