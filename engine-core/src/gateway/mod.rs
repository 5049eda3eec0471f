//! Exchange gateway (§4.2): the only component that speaks to the exchange
//! over REST. Normalizes inputs, rate-limits, retries transient failures,
//! and classifies errors so upper layers never have to parse exchange-
//! specific codes themselves.
//!
//! Grounded on `resilience::backoff::ExponentialBackoff` (reused verbatim
//! for the retry delay curve) and original_source `orders/exchange_client.py`
//! (retryable/fatal/cancel-ignorable code taxonomy, now in [`crate::errors`]).

pub mod paper;
mod rate_limit;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::TransportError;
use crate::orders::{OrderType, Side};
use crate::resilience::backoff::{BackoffConfig, ExponentialBackoff};

pub use paper::PaperMatcher;
pub use rate_limit::SlidingWindowLimiter;

/// Parameters for a new order, already rounded by the symbol catalog.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reduce_only: bool,
}

/// What the exchange handed back for a successful placement.
#[derive(Debug, Clone)]
pub struct PlaceOrderAck {
    pub exchange_order_id: String,
}

/// A single item in a batch cancel/place result — maps back to the
/// `client_order_id` it was submitted under.
#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub client_order_id: String,
    pub result: Result<PlaceOrderAck, TransportError>,
}

/// The REST surface the order manager depends on. A trait object so paper
/// and live modes can swap implementations behind the same interface
/// (§9 — dynamic dispatch at the mode seam).
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderAck, TransportError>;
    async fn place_batch(&self, reqs: Vec<PlaceOrderRequest>) -> Vec<BatchItemResult>;
    async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> Result<(), TransportError>;
    async fn cancel_all(&self, symbol: &str) -> Result<(), TransportError>;
    /// Clock offset (ms) vs. exchange server time, computed at connect.
    fn clock_offset_ms(&self) -> i64;
}

/// Live REST implementation: rate-limited, retrying, throttle-aware.
///
/// The transport itself (HTTP client, signing) is intentionally left as a
/// seam — `send` is the one method a concrete exchange binding supplies.
pub struct RestGateway<T: RequestSender> {
    sender: T,
    limiter: SlidingWindowLimiter,
    backoff_config: BackoffConfig,
    max_attempts: usize,
    clock_offset_ms: std::sync::atomic::AtomicI64,
    consecutive_retryable: std::sync::atomic::AtomicU32,
}

/// The raw transport seam: one call out over the wire. Implementations sign
/// and dispatch; the gateway only ever sees a parsed outcome.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn place(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderAck, TransportError>;
    async fn cancel(&self, symbol: &str, exchange_order_id: &str) -> Result<(), TransportError>;
    async fn cancel_all(&self, symbol: &str) -> Result<(), TransportError>;
    async fn server_time_ms(&self) -> Result<i64, TransportError>;
}

impl<T: RequestSender> RestGateway<T> {
    pub fn new(sender: T) -> Self {
        Self {
            sender,
            limiter: SlidingWindowLimiter::new(20, Duration::from_secs(1)),
            backoff_config: BackoffConfig {
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(4),
                multiplier: 2.0,
                max_retries: Some(3),
                jitter_factor: 0.1,
            },
            max_attempts: 3,
            clock_offset_ms: std::sync::atomic::AtomicI64::new(0),
            consecutive_retryable: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Sync the clock offset against the exchange's server time. Call once
    /// on connect; the offset is injected into every signed request after.
    pub async fn sync_clock(&self) -> Result<(), TransportError> {
        let server_ms = self.sender.server_time_ms().await?;
        let local_ms = crate::orders::now_ms();
        self.clock_offset_ms.store(server_ms - local_ms as i64, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn note_outcome(&self, transient: bool) {
        use std::sync::atomic::Ordering;
        if transient {
            self.consecutive_retryable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.consecutive_retryable.store(0, Ordering::Relaxed);
        }
    }

    /// Effective token budget for this window — halved once a second
    /// consecutive transient error is observed, restored after a success.
    fn throttled(&self) -> bool {
        self.consecutive_retryable.load(std::sync::atomic::Ordering::Relaxed) >= 2
    }

    async fn with_retry<F, Fut, R>(&self, op: F) -> Result<R, TransportError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<R, TransportError>>,
    {
        let mut backoff = ExponentialBackoff::with_config(self.backoff_config.clone());
        let mut attempt = 0;
        loop {
            attempt += 1;
            let permit_cost = if self.throttled() { 2 } else { 1 };
            self.limiter.acquire(permit_cost).await;

            match op().await {
                Ok(v) => {
                    self.note_outcome(false);
                    return Ok(v);
                }
                Err(e) if e.transient && attempt < self.max_attempts => {
                    self.note_outcome(true);
                    tracing::warn!(attempt, error = %e, "transient gateway error, retrying");
                    if let Some(delay) = backoff.next_delay() {
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
                Err(e) => {
                    self.note_outcome(e.transient);
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<T: RequestSender> ExchangeGateway for RestGateway<T> {
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderAck, TransportError> {
        self.with_retry(|| self.sender.place(&req)).await
    }

    async fn place_batch(&self, reqs: Vec<PlaceOrderRequest>) -> Vec<BatchItemResult> {
        let mut results = Vec::with_capacity(reqs.len());
        for chunk in reqs.chunks(5) {
            for req in chunk {
                let result = self.with_retry(|| self.sender.place(req)).await;
                results.push(BatchItemResult { client_order_id: req.client_order_id.clone(), result });
            }
        }
        results
    }

    async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> Result<(), TransportError> {
        match self.with_retry(|| self.sender.cancel(symbol, exchange_order_id)).await {
            Ok(()) => Ok(()),
            Err(e) => match &e.code {
                Some(code) if TransportError::is_cancel_ignorable(code) => {
                    tracing::debug!(code, "cancel-ignorable code, treating as successful cancel");
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    async fn cancel_all(&self, symbol: &str) -> Result<(), TransportError> {
        self.with_retry(|| self.sender.cancel_all(symbol)).await
    }

    fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms.load(std::sync::atomic::Ordering::Relaxed)
    }
}
