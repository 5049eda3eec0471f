//! Universal order record (§3) and supporting enums.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Position direction, distinct from order `Side` (§3: "long|short").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    pub fn opposite(self) -> PositionSide {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// The order side that opens this position direction.
    pub fn opening_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// The order side that closes/reduces this position direction.
    pub fn closing_side(self) -> Side {
        self.opening_side().opposite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    /// Short ASCII tag embedded in the client order id.
    fn short_code(self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::Limit => "LMT",
            OrderType::StopMarket => "STP",
            OrderType::TakeProfitMarket => "TPM",
        }
    }
}

/// What caused an order to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Manual,
    Chase,
    Scalper,
    Twap,
    TrailStop,
    Basket,
    Liquidation,
    Recovered,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Manual => "MANUAL",
            Origin::Chase => "CHASE",
            Origin::Scalper => "SCALPER",
            Origin::Twap => "TWAP",
            Origin::TrailStop => "TRAIL_STOP",
            Origin::Basket => "BASKET",
            Origin::Liquidation => "LIQUIDATION",
            Origin::Recovered => "RECOVERED",
        }
    }
}

/// Order lifecycle state (§3). See [`crate::orders::state`] for the
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Idle,
    Placing,
    Active,
    Cancelling,
    Filled,
    Cancelled,
    Expired,
    Failed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Idle => "idle",
            OrderStatus::Placing => "placing",
            OrderStatus::Active => "active",
            OrderStatus::Cancelling => "cancelling",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired | OrderStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Placing | OrderStatus::Active | OrderStatus::Cancelling)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Generate a client order id: `PMS<8-char account prefix>_<short-type>_<12 hex>`.
/// Stays within the exchange's 36-character cap.
pub fn generate_client_order_id(account_id: &str, order_type: OrderType) -> String {
    let prefix: String = account_id.chars().take(8).collect();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect();
    format!("PMS{}_{}_{}", prefix, order_type.short_code(), suffix)
}

/// The universal order record (§3).
#[derive(Debug, Clone)]
pub struct Order {
    pub client_order_id: String,
    pub account_id: String,
    pub exchange_order_id: Option<String>,

    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reduce_only: bool,
    pub leverage: u32,

    pub origin: Origin,
    pub parent_id: Option<String>,

    pub status: OrderStatus,

    pub filled_qty: f64,
    pub avg_fill_price: f64,
    pub last_fill_price: f64,
    pub last_fill_qty: f64,

    pub created_at: u64,
    pub updated_at: u64,
}

impl Order {
    pub fn new(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        stop_price: Option<f64>,
        leverage: u32,
        reduce_only: bool,
        origin: Origin,
        parent_id: Option<String>,
    ) -> Self {
        let account_id = account_id.into();
        let client_order_id = generate_client_order_id(&account_id, order_type);
        let ts = now_ms();
        Self {
            client_order_id,
            account_id,
            exchange_order_id: None,
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price,
            stop_price,
            reduce_only,
            leverage: leverage.max(1),
            origin,
            parent_id,
            status: OrderStatus::Idle,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            last_fill_price: 0.0,
            last_fill_qty: 0.0,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn remaining_qty(&self) -> f64 {
        (self.quantity - self.filled_qty).max(0.0)
    }

    pub fn fill_pct(&self) -> f64 {
        if self.quantity <= 0.0 {
            return 0.0;
        }
        (self.filled_qty / self.quantity) * 100.0
    }

    pub fn is_stale(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        self.status == OrderStatus::Placing && now_ms.saturating_sub(self.created_at) > stale_after_ms
    }

    /// Apply a fill event from the exchange feed: weighted-average the fill
    /// price into `avg_fill_price`, update `last_fill_*`.
    pub fn apply_fill(&mut self, fill_price: f64, fill_qty: f64, now_ms: u64) {
        if fill_qty <= 0.0 {
            return;
        }
        let total_filled = self.filled_qty + fill_qty;
        if total_filled > 0.0 {
            self.avg_fill_price = (self.avg_fill_price * self.filled_qty + fill_price * fill_qty) / total_filled;
        }
        self.filled_qty = total_filled;
        self.last_fill_price = fill_price;
        self.last_fill_qty = fill_qty;
        self.updated_at = now_ms;
    }
}

/// A single fill event as delivered by the exchange feed.
#[derive(Debug, Clone, Copy)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_order_id_stays_within_exchange_limit() {
        let id = generate_client_order_id("abcdefghijklmnop", OrderType::Limit);
        assert!(id.len() <= 36, "id too long: {id} ({} chars)", id.len());
        assert!(id.starts_with("PMSabcdefgh_LMT_"));
    }

    #[test]
    fn apply_fill_computes_weighted_average() {
        let mut order = Order::new("acct0001", "BTCUSDT", Side::Buy, OrderType::Limit, 0.002, Some(100.0), None, 1, false, Origin::Manual, None);
        order.apply_fill(100.0, 0.001, 1);
        order.apply_fill(102.0, 0.001, 2);
        assert!((order.avg_fill_price - 101.0).abs() < 1e-9);
        assert_eq!(order.filled_qty, 0.002);
        assert_eq!(order.last_fill_price, 102.0);
    }

    #[test]
    fn remaining_qty_never_negative() {
        let mut order = Order::new("acct0001", "BTCUSDT", Side::Buy, OrderType::Market, 0.001, None, None, 1, false, Origin::Manual, None);
        order.apply_fill(100.0, 0.002, 1);
        assert_eq!(order.remaining_qty(), 0.0);
    }
}
