//! Paper-trading matcher (§6 "Paper-trading contract"): a [`RequestSender`]
//! backed by the market-data fan-out instead of a real exchange, so paper
//! mode drives the same [`super::RestGateway`]/[`crate::orders::manager::OrderManager`]
//! machinery live mode does.
//!
//! The match rules themselves are pure functions of the latest quote so
//! they're deterministic and unit-testable independent of any async
//! plumbing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{PlaceOrderAck, PlaceOrderRequest, RequestSender};
use crate::errors::TransportError;
use crate::marketdata::{MarketDataFanout, Quote};
use crate::orders::{OrderType, Side};

/// Decide whether `req` would fill against `quote` right now, and at what
/// price. Mirrors the exchange's own trigger semantics exactly so paper and
/// live runs produce the same order trajectory.
pub fn matches(order_type: OrderType, side: Side, price: Option<f64>, stop_price: Option<f64>, quote: Quote) -> Option<f64> {
    match (order_type, side) {
        (OrderType::Market, Side::Buy) => Some(quote.ask),
        (OrderType::Market, Side::Sell) => Some(quote.bid),
        (OrderType::Limit, Side::Buy) => price.filter(|&p| quote.ask <= p).map(|p| p),
        (OrderType::Limit, Side::Sell) => price.filter(|&p| quote.bid >= p).map(|p| p),
        (OrderType::StopMarket, Side::Buy) => stop_price.filter(|&p| quote.ask >= p).map(|_| quote.ask),
        (OrderType::StopMarket, Side::Sell) => stop_price.filter(|&p| quote.bid <= p).map(|_| quote.bid),
        (OrderType::TakeProfitMarket, Side::Buy) => stop_price.filter(|&p| quote.ask <= p).map(|_| quote.ask),
        (OrderType::TakeProfitMarket, Side::Sell) => stop_price.filter(|&p| quote.bid >= p).map(|_| quote.bid),
    }
}

/// A paper-mode [`RequestSender`]: every placement is checked against the
/// latest cached quote and accepted (synthetic exchange id assigned) only
/// when it would immediately match. A resting order that doesn't yet match
/// is rejected as transient so the caller's retry/backoff path doesn't
/// mistake it for a fatal error — a real feed-replay harness that holds
/// resting paper orders until they match is a natural next extension, not
/// built here.
pub struct PaperMatcher {
    fanout: Arc<MarketDataFanout>,
    next_exchange_id: AtomicU64,
}

impl PaperMatcher {
    pub fn new(fanout: Arc<MarketDataFanout>) -> Self {
        Self { fanout, next_exchange_id: AtomicU64::new(1) }
    }

    fn synthetic_exchange_id(&self) -> String {
        format!("PAPER{}", self.next_exchange_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl RequestSender for PaperMatcher {
    async fn place(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderAck, TransportError> {
        let quote = self
            .fanout
            .latest(&req.symbol)
            .ok_or_else(|| TransportError::transient(format!("no market data for {}", req.symbol)))?;

        match matches(req.order_type, req.side, req.price, req.stop_price, quote) {
            Some(_fill_price) => Ok(PlaceOrderAck { exchange_order_id: self.synthetic_exchange_id() }),
            None => Err(TransportError::transient("order would not fill at the current quote")),
        }
    }

    async fn cancel(&self, _symbol: &str, _exchange_order_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn cancel_all(&self, _symbol: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn server_time_ms(&self) -> Result<i64, TransportError> {
        Ok(crate::orders::now_ms() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote { bid, ask, mid: (bid + ask) / 2.0, timestamp_ms: 0 }
    }

    #[test]
    fn market_orders_always_match_the_opposite_bbo() {
        assert_eq!(matches(OrderType::Market, Side::Buy, None, None, quote(99.0, 101.0)), Some(101.0));
        assert_eq!(matches(OrderType::Market, Side::Sell, None, None, quote(99.0, 101.0)), Some(99.0));
    }

    #[test]
    fn limit_buy_fills_at_the_limit_price_when_ask_crosses() {
        assert_eq!(matches(OrderType::Limit, Side::Buy, Some(102.0), None, quote(99.0, 101.0)), Some(102.0));
        assert_eq!(matches(OrderType::Limit, Side::Buy, Some(100.0), None, quote(99.0, 101.0)), None);
    }

    #[test]
    fn limit_sell_fills_at_the_limit_price_when_bid_crosses() {
        assert_eq!(matches(OrderType::Limit, Side::Sell, Some(98.0), None, quote(99.0, 101.0)), Some(98.0));
        assert_eq!(matches(OrderType::Limit, Side::Sell, Some(100.0), None, quote(99.0, 101.0)), None);
    }

    #[test]
    fn stop_market_buy_triggers_when_ask_reaches_stop() {
        assert_eq!(matches(OrderType::StopMarket, Side::Buy, None, Some(100.0), quote(99.0, 101.0)), Some(101.0));
        assert_eq!(matches(OrderType::StopMarket, Side::Buy, None, Some(105.0), quote(99.0, 101.0)), None);
    }

    #[test]
    fn take_profit_market_sell_triggers_when_bid_reaches_stop() {
        assert_eq!(matches(OrderType::TakeProfitMarket, Side::Sell, None, Some(100.0), quote(99.0, 101.0)), Some(101.0));
        assert_eq!(matches(OrderType::TakeProfitMarket, Side::Sell, None, Some(105.0), quote(99.0, 101.0)), None);
    }

    #[tokio::test]
    async fn place_rejects_when_no_quote_is_cached() {
        let matcher = PaperMatcher::new(Arc::new(MarketDataFanout::new()));
        let req = PlaceOrderRequest {
            client_order_id: "PMStest_MKT_1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: 0.01,
            price: None,
            stop_price: None,
            reduce_only: false,
        };
        let result = matcher.place(&req).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().transient);
    }
}
