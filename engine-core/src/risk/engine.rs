//! Risk engine (§4.10): wires the position book, pre-trade validator, and
//! liquidation engine to fill/tick events, emitting events and persistence
//! rows as a side effect of each event.
//!
//! Grounded on original_source `risk/engine.py` (fill-vs-position-state
//! decision tree: open / add / partial-close / full-close / flip).

use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{AccountSnapshot, Event, EventKind, PositionSnapshot, SequenceCounter};
use crate::orders::{Fill, PositionSide, Side};
use crate::risk::liquidation::{self, AdlTier};
use crate::risk::math;
use crate::risk::position_book::{AccountMeta, PositionBook, RiskRules, VirtualPosition};

/// Minimum interval between throttled per-account risk snapshots (§4.10).
const RISK_SNAPSHOT_THROTTLE_MS: u64 = 1_000;

pub struct RiskEngine {
    book: PositionBook,
    seq: Arc<SequenceCounter>,
    next_position_id: u64,
    last_snapshot_emit: HashMap<String, u64>,
}

/// Outcome of applying a fill: what changed, for the caller (order manager)
/// to persist and broadcast.
#[derive(Debug, Clone)]
pub enum FillOutcome {
    Opened { position_id: String },
    Added { position_id: String },
    PartiallyClosed { position_id: String, realized_pnl: f64 },
    FullyClosed { position_id: String, realized_pnl: f64, flipped_into: Option<String> },
}

impl RiskEngine {
    pub fn new(seq: Arc<SequenceCounter>) -> Self {
        Self { book: PositionBook::new(), seq, next_position_id: 0, last_snapshot_emit: HashMap::new() }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut PositionBook {
        &mut self.book
    }

    /// An owned snapshot of one position, for callers that need to read it
    /// across an `.await` point without holding the engine's lock.
    pub fn position(&self, account_id: &str, position_id: &str) -> Option<VirtualPosition> {
        self.book.position(account_id, position_id).cloned()
    }

    fn fresh_position_id(&mut self) -> String {
        self.next_position_id += 1;
        format!("pos{}", self.next_position_id)
    }

    /// Apply a fill on `symbol`/`side` (order side, not position side) for
    /// `account_id`. `leverage` seeds a newly-opened position only.
    pub fn apply_fill(&mut self, account_id: &str, symbol: &str, order_side: Side, fill: Fill, leverage: u32) -> FillOutcome {
        let opening_position_side = match order_side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        };
        let closing_position_side = opening_position_side.opposite();

        if let Some(existing) = self.book.find_position(account_id, symbol, closing_position_side).map(|p| p.id.clone()) {
            return self.apply_closing_fill(account_id, symbol, &existing, fill, leverage, opening_position_side);
        }

        if let Some(existing_id) = self.book.find_position(account_id, symbol, opening_position_side).map(|p| p.id.clone()) {
            self.add_to_position(account_id, &existing_id, fill);
            return FillOutcome::Added { position_id: existing_id };
        }

        let id = self.fresh_position_id();
        let pos = VirtualPosition::new(id.clone(), account_id, symbol, opening_position_side, fill.price, fill.quantity, leverage);
        self.book.add(pos);
        FillOutcome::Opened { position_id: id }
    }

    fn add_to_position(&mut self, account_id: &str, position_id: &str, fill: Fill) {
        if let Some(pos) = self.book.position_mut(account_id, position_id) {
            let total_qty = pos.quantity + fill.quantity;
            pos.entry_price = (pos.entry_price * pos.quantity + fill.price * fill.quantity) / total_qty;
            pos.quantity = total_qty;
        }
    }

    fn apply_closing_fill(&mut self, account_id: &str, symbol: &str, position_id: &str, fill: Fill, leverage: u32, opening_side_if_flip: PositionSide) -> FillOutcome {
        let (pos_qty, realized) = {
            let pos = self.book.position_mut(account_id, position_id).expect("position just looked up");
            let realized = math::pnl(pos.side, pos.entry_price, fill.price, fill.quantity.min(pos.quantity));
            (pos.quantity, realized)
        };

        if fill.quantity < pos_qty {
            if let Some(pos) = self.book.position_mut(account_id, position_id) {
                pos.quantity -= fill.quantity;
            }
            if let Some(meta) = self.book.meta(account_id) {
                let new_balance = meta.balance + realized;
                self.book.update_balance(account_id, new_balance);
            }
            return FillOutcome::PartiallyClosed { position_id: position_id.to_string(), realized_pnl: realized };
        }

        // Full close (fill_qty >= position_qty); excess opens a new position
        // on the other side.
        self.book.remove(account_id, position_id);
        if let Some(meta) = self.book.meta(account_id) {
            let new_balance = meta.balance + realized;
            self.book.update_balance(account_id, new_balance);
        }

        let excess = fill.quantity - pos_qty;
        let flipped_into = if excess > 0.0 {
            let id = self.fresh_position_id();
            let pos = VirtualPosition::new(id.clone(), account_id, symbol, opening_side_if_flip, fill.price, excess, leverage);
            self.book.add(pos);
            Some(id)
        } else {
            None
        };

        FillOutcome::FullyClosed { position_id: position_id.to_string(), realized_pnl: realized, flipped_into }
    }

    /// Update mark price and unrealized PnL for every position on `symbol`,
    /// across all accounts holding it (§4.10 tick handling).
    pub fn on_tick(&mut self, symbol: &str, mark_price: f64) -> Vec<(String, Option<LiquidationSignal>)> {
        let mut results = Vec::new();
        for account_id in self.book.get_accounts_for_symbol(symbol) {
            let position_ids: Vec<String> = self
                .book
                .positions_for_account_and_symbol(&account_id, symbol)
                .iter()
                .map(|p| p.id.clone())
                .collect();
            for pid in position_ids {
                if let Some(pos) = self.book.position_mut(&account_id, &pid) {
                    pos.update_mark(mark_price);
                }
            }
            let signal = liquidation::evaluate_account(&self.book, &account_id, |_| Some(mark_price))
                .map(|eval| LiquidationSignal { tier: eval.tier, ratio: eval.ratio, position_ids: eval.positions_to_close });
            results.push((account_id, signal));
        }
        results
    }

    /// Whether a throttled per-account risk snapshot is due to be emitted.
    pub fn snapshot_due(&mut self, account_id: &str, now: u64) -> bool {
        match self.last_snapshot_emit.get(account_id) {
            Some(last) if now.saturating_sub(*last) < RISK_SNAPSHOT_THROTTLE_MS => false,
            _ => {
                self.last_snapshot_emit.insert(account_id.to_string(), now);
                true
            }
        }
    }

    /// Pure account snapshot builder (§4.10).
    pub fn snapshot(&self, account_id: &str) -> Option<AccountSnapshot> {
        let meta: &AccountMeta = self.book.meta(account_id)?;
        let positions = self.book.positions_for_account(account_id);
        let total_upnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
        let total_margin: f64 = positions.iter().map(|p| p.margin()).sum();
        let equity = meta.balance + total_upnl;

        let position_snapshots = positions
            .iter()
            .map(|p| PositionSnapshot {
                position_id: p.id.clone(),
                symbol: p.symbol.clone(),
                side: p.side.as_str(),
                quantity: p.quantity,
                entry_price: p.entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealized_pnl,
                pnl_percent: if p.margin() > 0.0 { (p.unrealized_pnl / p.margin()) * 100.0 } else { 0.0 },
            })
            .collect();

        Some(AccountSnapshot { balance: meta.balance, equity, margin_used: total_margin, available_margin: equity - total_margin, positions: position_snapshots })
    }

    /// `force_close_stale_position` (§4.10): remove a virtual position with
    /// no backing fill, when a reduce-only close failed because the
    /// exchange reports the position already gone.
    pub fn force_close_stale_position(&mut self, account_id: &str, position_id: &str) -> Option<Event> {
        self.book.remove(account_id, position_id)?;
        Some(crate::events::build_event(
            &self.seq,
            EventKind::PositionClosed { position_id: position_id.to_string(), stale_cleanup: true },
            self.snapshot(account_id),
        ))
    }

    pub fn rules(&self, account_id: &str) -> RiskRules {
        self.book.rules(account_id)
    }
}

#[derive(Debug, Clone)]
pub struct LiquidationSignal {
    pub tier: AdlTier,
    pub ratio: f64,
    pub position_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::position_book::AccountStatus;

    fn engine_with_account(balance: f64) -> RiskEngine {
        let mut engine = RiskEngine::new(Arc::new(SequenceCounter::new()));
        engine.book_mut().load_account(
            "acct1",
            AccountMeta { balance, maintenance_rate: 0.005, adl_threshold: 0.90, status: AccountStatus::Active },
            vec![],
            RiskRules::default(),
        );
        engine
    }

    #[test]
    fn first_fill_opens_a_position() {
        let mut engine = engine_with_account(1000.0);
        let outcome = engine.apply_fill("acct1", "BTCUSDT", Side::Buy, Fill { price: 100.0, quantity: 0.01 }, 10);
        assert!(matches!(outcome, FillOutcome::Opened { .. }));
        assert_eq!(engine.book().positions_for_account("acct1").len(), 1);
    }

    #[test]
    fn same_side_fill_averages_into_existing_position() {
        let mut engine = engine_with_account(1000.0);
        engine.apply_fill("acct1", "BTCUSDT", Side::Buy, Fill { price: 100.0, quantity: 0.01 }, 10);
        let outcome = engine.apply_fill("acct1", "BTCUSDT", Side::Buy, Fill { price: 110.0, quantity: 0.01 }, 10);
        assert!(matches!(outcome, FillOutcome::Added { .. }));
        let pos = &engine.book().positions_for_account("acct1")[0];
        assert!((pos.entry_price - 105.0).abs() < 1e-9);
        assert_eq!(pos.quantity, 0.02);
    }

    #[test]
    fn opposite_fill_smaller_than_position_partially_closes() {
        let mut engine = engine_with_account(1000.0);
        engine.apply_fill("acct1", "BTCUSDT", Side::Buy, Fill { price: 100.0, quantity: 0.02 }, 10);
        let outcome = engine.apply_fill("acct1", "BTCUSDT", Side::Sell, Fill { price: 110.0, quantity: 0.01 }, 10);
        match outcome {
            FillOutcome::PartiallyClosed { realized_pnl, .. } => assert!((realized_pnl - 0.1).abs() < 1e-9),
            other => panic!("expected partial close, got {other:?}"),
        }
        assert_eq!(engine.book().positions_for_account("acct1")[0].quantity, 0.01);
    }

    #[test]
    fn opposite_fill_equal_to_position_fully_closes() {
        let mut engine = engine_with_account(1000.0);
        engine.apply_fill("acct1", "BTCUSDT", Side::Buy, Fill { price: 100.0, quantity: 0.01 }, 10);
        let outcome = engine.apply_fill("acct1", "BTCUSDT", Side::Sell, Fill { price: 105.0, quantity: 0.01 }, 10);
        assert!(matches!(outcome, FillOutcome::FullyClosed { flipped_into: None, .. }));
        assert!(engine.book().positions_for_account("acct1").is_empty());
    }

    #[test]
    fn opposite_fill_larger_than_position_flips_and_opens_remainder() {
        let mut engine = engine_with_account(1000.0);
        engine.apply_fill("acct1", "BTCUSDT", Side::Buy, Fill { price: 100.0, quantity: 0.01 }, 10);
        let outcome = engine.apply_fill("acct1", "BTCUSDT", Side::Sell, Fill { price: 105.0, quantity: 0.03 }, 10);
        match outcome {
            FillOutcome::FullyClosed { flipped_into: Some(_), .. } => {}
            other => panic!("expected flip, got {other:?}"),
        }
        let remaining = engine.book().positions_for_account("acct1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].side, PositionSide::Short);
        assert!((remaining[0].quantity - 0.02).abs() < 1e-9);
    }

    #[test]
    fn snapshot_throttle_gates_a_second_call_within_window() {
        let mut engine = engine_with_account(1000.0);
        assert!(engine.snapshot_due("acct1", 1000));
        assert!(!engine.snapshot_due("acct1", 1100));
        assert!(engine.snapshot_due("acct1", 1000 + RISK_SNAPSHOT_THROTTLE_MS + 1));
    }
}
