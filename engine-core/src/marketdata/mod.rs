//! Market-data fan-out (§4.3): latest L1 cache plus subscriber dispatch.
//!
//! Grounded on `resilience::reconnect`'s feed-wrapper shape (adapted from
//! sync `std::thread::sleep` to async) and original_source
//! `feeds/market_data.py`'s subscribe/callback contract and throttle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::orders::now_ms;

/// Latest best bid/ask/mid for a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub timestamp_ms: u64,
}

/// A raw orderbook snapshot as delivered by the feed. Only the top of book
/// is consulted.
#[derive(Debug, Clone)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderbookSnapshot {
    fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }
}

pub type QuoteCallback = Arc<dyn Fn(&str, f64, f64, f64) + Send + Sync>;

const PUBLISH_THROTTLE_MS: u64 = 500;

/// Caches the latest quote per symbol and fans out changes to subscribers
/// without ever blocking the producer on a slow one.
pub struct MarketDataFanout {
    quotes: DashMap<String, Quote>,
    subscribers: DashMap<String, Vec<QuoteCallback>>,
    last_published: Mutex<HashMap<String, Instant>>,
}

impl Default for MarketDataFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataFanout {
    pub fn new() -> Self {
        Self { quotes: DashMap::new(), subscribers: DashMap::new(), last_published: Mutex::new(HashMap::new()) }
    }

    pub fn subscribe(&self, symbol: impl Into<String>, callback: QuoteCallback) {
        self.subscribers.entry(symbol.into()).or_default().push(callback);
    }

    pub fn latest(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(symbol).map(|q| *q)
    }

    /// Ingest a snapshot. No-op if either side of book is missing or the
    /// bid/ask pair is unchanged from the cached value.
    pub fn on_snapshot(self: &Arc<Self>, snapshot: OrderbookSnapshot) {
        let (Some(bid), Some(ask)) = (snapshot.best_bid(), snapshot.best_ask()) else {
            return;
        };
        if let Some(existing) = self.quotes.get(&snapshot.symbol) {
            if existing.bid == bid && existing.ask == ask {
                return;
            }
        }
        let quote = Quote { bid, ask, mid: (bid + ask) / 2.0, timestamp_ms: now_ms() };
        self.quotes.insert(snapshot.symbol.clone(), quote);

        if let Some(callbacks) = self.subscribers.get(&snapshot.symbol) {
            for cb in callbacks.iter().cloned() {
                let symbol = snapshot.symbol.clone();
                // Fire-and-forget: a slow subscriber must never delay the
                // producer or any other subscriber.
                tokio::spawn(async move {
                    cb(&symbol, bid, ask, quote.mid);
                });
            }
        }
    }

    /// Whether enough time has elapsed to publish this symbol's quote to the
    /// event bus again (≥ 500ms between publishes). Cache updates and
    /// callback dispatch above are never subject to this throttle.
    pub async fn should_publish(&self, symbol: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last_published.lock().await;
        match last.get(symbol) {
            Some(prev) if now.duration_since(*prev) < Duration::from_millis(PUBLISH_THROTTLE_MS) => false,
            _ => {
                last.insert(symbol.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(symbol: &str, bid: f64, ask: f64) -> OrderbookSnapshot {
        OrderbookSnapshot { symbol: symbol.to_string(), bids: vec![(bid, 1.0)], asks: vec![(ask, 1.0)] }
    }

    #[test]
    fn missing_side_is_dropped() {
        let fanout = Arc::new(MarketDataFanout::new());
        fanout.on_snapshot(OrderbookSnapshot { symbol: "BTCUSDT".into(), bids: vec![], asks: vec![(100.0, 1.0)] });
        assert!(fanout.latest("BTCUSDT").is_none());
    }

    #[test]
    fn unchanged_quote_is_a_no_op() {
        let fanout = Arc::new(MarketDataFanout::new());
        fanout.on_snapshot(snapshot("BTCUSDT", 99.0, 101.0));
        let first = fanout.latest("BTCUSDT").unwrap();
        fanout.on_snapshot(snapshot("BTCUSDT", 99.0, 101.0));
        let second = fanout.latest("BTCUSDT").unwrap();
        assert_eq!(first.timestamp_ms, second.timestamp_ms);
    }

    #[tokio::test]
    async fn subscriber_is_invoked_on_change() {
        let fanout = Arc::new(MarketDataFanout::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        fanout.subscribe("BTCUSDT", Arc::new(move |_sym, _bid, _ask, _mid| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        fanout.on_snapshot(snapshot("BTCUSDT", 99.0, 101.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_throttle_gates_the_second_call_within_window() {
        let fanout = MarketDataFanout::new();
        assert!(fanout.should_publish("BTCUSDT").await);
        assert!(!fanout.should_publish("BTCUSDT").await);
    }
}
