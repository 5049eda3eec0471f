//! Symbol catalog (§4.1) — price/quantity rounding and min-notional from
//! exchange metadata, loaded once on startup.
//!
//! Ported from the original service's `SymbolInfoCache`: Binance-style
//! filters (`PRICE_FILTER`, `LOT_SIZE`, `MARKET_LOT_SIZE`, `MIN_NOTIONAL`)
//! parsed into a per-symbol [`SymbolSpec`]. Rounding always truncates
//! (floors) — an order is never rounded up past what was requested.

use dashmap::DashMap;

/// Parsed filter data for one perpetual symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolSpec {
    pub tick_size: f64,
    pub step_size: f64,
    pub market_step_size: f64,
    pub min_qty: f64,
    pub max_qty: f64,
    pub min_notional: f64,
    pub price_precision: u32,
    pub qty_precision: u32,
    pub market_qty_precision: u32,
}

impl Default for SymbolSpec {
    fn default() -> Self {
        Self {
            tick_size: 0.01,
            step_size: 0.001,
            market_step_size: 0.001,
            min_qty: 0.001,
            max_qty: 9_999_999.0,
            min_notional: 5.0,
            price_precision: 2,
            qty_precision: 3,
            market_qty_precision: 3,
        }
    }
}

/// Raw exchange filter entry as delivered by the exchange-info REST call.
#[derive(Debug, Clone)]
pub struct ExchangeFilter {
    pub filter_type: String,
    pub tick_size: Option<f64>,
    pub step_size: Option<f64>,
    pub min_qty: Option<f64>,
    pub max_qty: Option<f64>,
    pub min_notional: Option<f64>,
}

/// Raw per-symbol exchange-info entry.
#[derive(Debug, Clone)]
pub struct ExchangeSymbolInfo {
    pub symbol: String,
    pub contract_type: String,
    pub status: String,
    pub filters: Vec<ExchangeFilter>,
}

fn step_to_precision(step: f64) -> u32 {
    if step <= 0.0 || step >= 1.0 {
        return 0;
    }
    (-step.log10()).round().max(0.0) as u32
}

/// Truncate (never round up) a value to `precision` decimal places.
fn truncate(value: f64, precision: u32) -> f64 {
    if precision == 0 {
        return value.trunc();
    }
    let factor = 10f64.powi(precision as i32);
    (value * factor).floor() / factor
}

/// Caches symbol specs, keyed by normalized exchange-native symbol.
#[derive(Debug, Default)]
pub struct SymbolCatalog {
    specs: DashMap<String, SymbolSpec>,
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self { specs: DashMap::new() }
    }

    /// Normalize any symbol spelling to the exchange-native joined form:
    /// `BASE/QUOTE:QUOTE` or `BASE/QUOTE` -> `BASEQUOTE`.
    pub fn normalize(symbol: &str) -> String {
        let mut s = symbol.replace('/', "").to_uppercase();
        if let Some(stripped) = s.strip_suffix(":USDT") {
            s = stripped.to_string();
        }
        if !s.ends_with("USDT") {
            s.push_str("USDT");
        }
        s
    }

    /// Load exchange-info entries, keeping only live perpetual symbols.
    /// Returns the number of symbols loaded.
    pub fn load(&self, symbols: Vec<ExchangeSymbolInfo>) -> usize {
        let mut loaded = 0;
        for s in symbols {
            if s.contract_type != "PERPETUAL" || s.status != "TRADING" {
                continue;
            }
            let mut spec = SymbolSpec::default();
            for f in &s.filters {
                match f.filter_type.as_str() {
                    "PRICE_FILTER" => {
                        spec.tick_size = f.tick_size.unwrap_or(spec.tick_size);
                        spec.price_precision = step_to_precision(spec.tick_size);
                    }
                    "LOT_SIZE" => {
                        spec.step_size = f.step_size.unwrap_or(spec.step_size);
                        spec.min_qty = f.min_qty.unwrap_or(spec.min_qty);
                        spec.max_qty = f.max_qty.unwrap_or(spec.max_qty);
                        spec.qty_precision = step_to_precision(spec.step_size);
                    }
                    "MARKET_LOT_SIZE" => {
                        spec.market_step_size = f.step_size.unwrap_or(spec.market_step_size);
                        spec.market_qty_precision = step_to_precision(spec.market_step_size);
                    }
                    "MIN_NOTIONAL" => {
                        spec.min_notional = f.min_notional.unwrap_or(spec.min_notional);
                    }
                    _ => {}
                }
            }
            self.specs.insert(s.symbol.clone(), spec);
            loaded += 1;
        }
        tracing::info!(count = loaded, "loaded symbol specs");
        loaded
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolSpec> {
        self.specs.get(&Self::normalize(symbol)).map(|r| *r)
    }

    /// Insert or overwrite a spec directly — used by tests and by paper mode,
    /// which has no REST exchange-info call to draw from.
    pub fn insert(&self, symbol: &str, spec: SymbolSpec) {
        self.specs.insert(Self::normalize(symbol), spec);
    }

    /// Truncate to valid tick precision. Unknown symbols pass through
    /// unmodified — the catalog never invents precision it wasn't told.
    pub fn round_price(&self, symbol: &str, price: f64) -> f64 {
        match self.get(symbol) {
            Some(spec) => truncate(price, spec.price_precision),
            None => price,
        }
    }

    /// Truncate to valid step precision, then clamp into `[min_qty, max_qty]`.
    pub fn round_quantity(&self, symbol: &str, qty: f64, is_market: bool) -> f64 {
        match self.get(symbol) {
            Some(spec) => {
                let precision = if is_market { spec.market_qty_precision } else { spec.qty_precision };
                let truncated = truncate(qty, precision);
                truncated.clamp(spec.min_qty, spec.max_qty)
            }
            None => qty,
        }
    }

    pub fn min_notional(&self, symbol: &str) -> f64 {
        self.get(symbol).map(|s| s.min_notional).unwrap_or(5.0)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_btc() -> SymbolCatalog {
        let catalog = SymbolCatalog::new();
        catalog.insert(
            "BTCUSDT",
            SymbolSpec {
                tick_size: 0.1,
                step_size: 0.001,
                market_step_size: 0.001,
                min_qty: 0.001,
                max_qty: 1000.0,
                min_notional: 5.0,
                price_precision: 1,
                qty_precision: 3,
                market_qty_precision: 3,
            },
        );
        catalog
    }

    #[test]
    fn normalize_handles_slashed_and_settlement_suffix() {
        assert_eq!(SymbolCatalog::normalize("BTC/USDT:USDT"), "BTCUSDT");
        assert_eq!(SymbolCatalog::normalize("ethusdt"), "ETHUSDT");
        assert_eq!(SymbolCatalog::normalize("SOL/USDT"), "SOLUSDT");
    }

    #[test]
    fn round_price_truncates_never_rounds_up() {
        let catalog = catalog_with_btc();
        assert_eq!(catalog.round_price("BTCUSDT", 65432.17), 65432.1);
        assert_eq!(catalog.round_price("BTCUSDT", 65432.19), 65432.1);
    }

    #[test]
    fn round_price_is_idempotent_and_monotonic() {
        let catalog = catalog_with_btc();
        let once = catalog.round_price("BTCUSDT", 65432.179);
        let twice = catalog.round_price("BTCUSDT", once);
        assert_eq!(once, twice);

        let a = catalog.round_price("BTCUSDT", 100.0);
        let b = catalog.round_price("BTCUSDT", 100.5);
        assert!(b >= a);
    }

    #[test]
    fn round_quantity_clamps_to_min_qty() {
        let catalog = catalog_with_btc();
        assert_eq!(catalog.round_quantity("BTCUSDT", 0.0001, false), 0.001);
    }

    #[test]
    fn round_quantity_uses_market_precision_when_requested() {
        let catalog = SymbolCatalog::new();
        catalog.insert(
            "BTCUSDT",
            SymbolSpec {
                qty_precision: 3,
                market_qty_precision: 2,
                ..SymbolSpec::default()
            },
        );
        assert_eq!(catalog.round_quantity("BTCUSDT", 0.1234, true), 0.12);
        assert_eq!(catalog.round_quantity("BTCUSDT", 0.1234, false), 0.123);
    }

    #[test]
    fn unknown_symbol_passes_through() {
        let catalog = SymbolCatalog::new();
        assert_eq!(catalog.round_price("XYZUSDT", 1.23456), 1.23456);
        assert_eq!(catalog.min_notional("XYZUSDT"), 5.0);
    }
}
