//! Position book (§4.6). Pure data structure, no I/O — grounded on
//! original_source `risk/position_book.py` (dual index, symbol-prefix
//! fallback on `find_position`).

use std::collections::{HashMap, HashSet};

use crate::orders::PositionSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Frozen,
    Liquidated,
}

#[derive(Debug, Clone)]
pub struct RiskRules {
    pub max_leverage: u32,
    pub max_notional_per_trade: f64,
    pub max_total_exposure: f64,
    pub liquidation_threshold: f64,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self { max_leverage: 100, max_notional_per_trade: 200.0, max_total_exposure: 500.0, liquidation_threshold: 0.90 }
    }
}

#[derive(Debug, Clone)]
pub struct AccountMeta {
    pub balance: f64,
    pub maintenance_rate: f64,
    pub adl_threshold: f64,
    pub status: AccountStatus,
}

impl Default for AccountMeta {
    fn default() -> Self {
        Self { balance: 0.0, maintenance_rate: super::math::DEFAULT_MAINT_RATE, adl_threshold: 0.90, status: AccountStatus::Active }
    }
}

/// A per-(account, symbol, side) virtual position.
#[derive(Debug, Clone)]
pub struct VirtualPosition {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

impl VirtualPosition {
    pub fn new(id: impl Into<String>, account_id: impl Into<String>, symbol: impl Into<String>, side: PositionSide, entry_price: f64, quantity: f64, leverage: u32) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            leverage: leverage.max(1),
            mark_price: entry_price,
            unrealized_pnl: 0.0,
        }
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn margin(&self) -> f64 {
        self.notional() / self.leverage as f64
    }

    pub fn liquidation_price(&self, maint_rate: f64) -> f64 {
        super::math::approx_liquidation_price(self.side, self.entry_price, self.quantity, self.margin(), maint_rate)
    }

    pub fn update_mark(&mut self, mark_price: f64) {
        self.mark_price = mark_price;
        self.unrealized_pnl = super::math::pnl(self.side, self.entry_price, mark_price, self.quantity);
    }
}

#[derive(Debug, Default)]
struct AccountEntry {
    meta: AccountMeta,
    positions: HashMap<String, VirtualPosition>,
    rules: RiskRules,
}

/// In-memory book of all accounts' positions. No I/O; all persistence is
/// the risk engine's responsibility.
#[derive(Debug, Default)]
pub struct PositionBook {
    accounts: HashMap<String, AccountEntry>,
    /// symbol -> set of account ids holding a position in that symbol.
    symbol_index: HashMap<String, HashSet<String>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_account(&mut self, account_id: impl Into<String>, meta: AccountMeta, positions: Vec<VirtualPosition>, rules: RiskRules) {
        let account_id = account_id.into();
        let entry = self.accounts.entry(account_id.clone()).or_default();
        entry.meta = meta;
        entry.rules = rules;
        for pos in positions {
            self.symbol_index.entry(pos.symbol.clone()).or_default().insert(account_id.clone());
            entry.positions.insert(pos.id.clone(), pos);
        }
    }

    pub fn add(&mut self, position: VirtualPosition) {
        let account_id = position.account_id.clone();
        self.symbol_index.entry(position.symbol.clone()).or_default().insert(account_id.clone());
        self.accounts.entry(account_id).or_default().positions.insert(position.id.clone(), position);
    }

    /// Remove a position. The account entry itself is never removed — its
    /// balance and rules must persist even with zero open positions.
    pub fn remove(&mut self, account_id: &str, position_id: &str) -> Option<VirtualPosition> {
        let entry = self.accounts.get_mut(account_id)?;
        let removed = entry.positions.remove(position_id)?;

        let any_left_for_symbol = entry.positions.values().any(|p| p.symbol == removed.symbol);
        if !any_left_for_symbol {
            if let Some(set) = self.symbol_index.get_mut(&removed.symbol) {
                set.remove(account_id);
                if set.is_empty() {
                    self.symbol_index.remove(&removed.symbol);
                }
            }
        }
        Some(removed)
    }

    pub fn update_balance(&mut self, account_id: &str, new_balance: f64) {
        if let Some(entry) = self.accounts.get_mut(account_id) {
            entry.meta.balance = new_balance;
        }
    }

    pub fn position_mut(&mut self, account_id: &str, position_id: &str) -> Option<&mut VirtualPosition> {
        self.accounts.get_mut(account_id)?.positions.get_mut(position_id)
    }

    pub fn position(&self, account_id: &str, position_id: &str) -> Option<&VirtualPosition> {
        self.accounts.get(account_id)?.positions.get(position_id)
    }

    pub fn meta(&self, account_id: &str) -> Option<&AccountMeta> {
        self.accounts.get(account_id).map(|e| &e.meta)
    }

    pub fn rules(&self, account_id: &str) -> RiskRules {
        self.accounts.get(account_id).map(|e| e.rules.clone()).unwrap_or_default()
    }

    pub fn positions_for_account(&self, account_id: &str) -> Vec<&VirtualPosition> {
        self.accounts.get(account_id).map(|e| e.positions.values().collect()).unwrap_or_default()
    }

    pub fn positions_for_account_and_symbol(&self, account_id: &str, symbol: &str) -> Vec<&VirtualPosition> {
        self.positions_for_account(account_id).into_iter().filter(|p| p.symbol == symbol).collect()
    }

    /// Find a position by (account, symbol, side) exactly first, then fall
    /// back to a base-asset-prefix match if the exact symbol form isn't
    /// found (handles e.g. `BTCUSDT` vs `BTCUSD_PERP` spelling drift).
    pub fn find_position(&self, account_id: &str, symbol: &str, side: PositionSide) -> Option<&VirtualPosition> {
        let entry = self.accounts.get(account_id)?;
        if let Some(pos) = entry.positions.values().find(|p| p.symbol == symbol && p.side == side) {
            return Some(pos);
        }
        let base = base_asset_prefix(symbol);
        entry.positions.values().find(|p| p.side == side && base_asset_prefix(&p.symbol) == base)
    }

    pub fn get_accounts_for_symbol(&self, symbol: &str) -> Vec<String> {
        self.symbol_index.get(symbol).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }
}

fn base_asset_prefix(symbol: &str) -> &str {
    symbol.strip_suffix("USDT").unwrap_or(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_keeps_account_entry_with_empty_positions() {
        let mut book = PositionBook::new();
        book.load_account("acct1", AccountMeta { balance: 500.0, ..Default::default() }, vec![], RiskRules::default());
        let pos = VirtualPosition::new("p1", "acct1", "BTCUSDT", PositionSide::Long, 100.0, 0.01, 10);
        book.add(pos);

        book.remove("acct1", "p1");
        assert_eq!(book.meta("acct1").unwrap().balance, 500.0);
        assert!(book.positions_for_account("acct1").is_empty());
    }

    #[test]
    fn symbol_index_is_garbage_collected_when_last_position_removed() {
        let mut book = PositionBook::new();
        book.load_account("acct1", AccountMeta::default(), vec![], RiskRules::default());
        book.add(VirtualPosition::new("p1", "acct1", "BTCUSDT", PositionSide::Long, 100.0, 0.01, 10));
        assert_eq!(book.get_accounts_for_symbol("BTCUSDT"), vec!["acct1".to_string()]);

        book.remove("acct1", "p1");
        assert!(book.get_accounts_for_symbol("BTCUSDT").is_empty());
    }

    #[test]
    fn find_position_falls_back_to_base_asset_prefix() {
        let mut book = PositionBook::new();
        book.load_account("acct1", AccountMeta::default(), vec![], RiskRules::default());
        book.add(VirtualPosition::new("p1", "acct1", "BTCUSD_PERP", PositionSide::Long, 100.0, 0.01, 10));

        let found = book.find_position("acct1", "BTCUSDT", PositionSide::Long);
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, "p1");
    }

    #[test]
    fn margin_is_notional_over_leverage() {
        let pos = VirtualPosition::new("p1", "acct1", "BTCUSDT", PositionSide::Long, 100.0, 2.0, 10);
        assert_eq!(pos.notional(), 200.0);
        assert_eq!(pos.margin(), 20.0);
    }
}
