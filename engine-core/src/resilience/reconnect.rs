//! Resilient market-feed wrapper: automatic reconnection with exponential
//! backoff and staleness detection, feeding snapshots into
//! [`crate::marketdata::MarketDataFanout`].
//!
//! The transport itself is a seam ([`FeedConnection`]) so this wrapper
//! doesn't depend on any one exchange's WebSocket client.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffConfig, ExponentialBackoff};
use crate::marketdata::OrderbookSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ResilientFeedConfig {
    pub symbols: Vec<String>,
    pub backoff_config: BackoffConfig,
    pub connection_timeout: Duration,
    pub health_check_interval: Duration,
    /// Consider the connection stale after this many consecutive empty polls.
    pub stale_threshold: usize,
}

impl Default for ResilientFeedConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            backoff_config: BackoffConfig::default(),
            connection_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            stale_threshold: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconnectionStats {
    pub reconnection_attempts: u64,
    pub successful_reconnections: u64,
    pub failed_reconnections: u64,
}

/// The raw transport a concrete exchange feed binding supplies: connect
/// once, then poll snapshots until the socket dies.
#[async_trait::async_trait]
pub trait FeedConnection: Send + Sized {
    async fn connect(symbols: &[String]) -> Result<Self>;
    /// Non-blocking poll. `Ok(None)` means no new data, not an error.
    async fn try_recv(&mut self) -> Result<Option<OrderbookSnapshot>>;
}

/// Wraps a [`FeedConnection`] with reconnect-with-backoff and stale-socket
/// detection, so callers only ever see `try_recv` return `None` on a
/// transient gap rather than having to handle reconnection themselves.
pub struct ResilientMarketFeed<C: FeedConnection> {
    config: ResilientFeedConfig,
    conn: Option<C>,
    state: ConnectionState,
    backoff: ExponentialBackoff,
    stats: ReconnectionStats,
    last_health_check: Instant,
    empty_polls_since_health_check: usize,
    connection_established_at: Option<Instant>,
}

impl<C: FeedConnection> ResilientMarketFeed<C> {
    pub async fn new(config: ResilientFeedConfig) -> Result<Self> {
        info!(symbols = ?config.symbols, "creating resilient market feed");
        let backoff = ExponentialBackoff::with_config(config.backoff_config.clone());
        let mut feed = Self {
            config,
            conn: None,
            state: ConnectionState::Reconnecting,
            backoff,
            stats: ReconnectionStats::default(),
            last_health_check: Instant::now(),
            empty_polls_since_health_check: 0,
            connection_established_at: None,
        };
        feed.connect().await?;
        Ok(feed)
    }

    async fn connect(&mut self) -> Result<()> {
        self.stats.reconnection_attempts += 1;
        match C::connect(&self.config.symbols).await {
            Ok(conn) => {
                info!(attempt = self.stats.reconnection_attempts, "feed connected");
                self.conn = Some(conn);
                self.state = ConnectionState::Connected;
                self.stats.successful_reconnections += 1;
                self.connection_established_at = Some(Instant::now());
                self.backoff.reset();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "feed connection attempt failed");
                self.state = ConnectionState::Reconnecting;
                self.stats.failed_reconnections += 1;
                Err(e).context("connection attempt failed")
            }
        }
    }

    async fn try_reconnect(&mut self) -> Result<()> {
        if !self.backoff.can_retry() {
            error!("max reconnection attempts reached");
            self.state = ConnectionState::Failed;
            anyhow::bail!("max reconnection attempts exceeded");
        }
        if let Some(delay) = self.backoff.next_delay() {
            debug!(?delay, attempt = self.backoff.attempt_number(), "waiting before reconnection attempt");
            tokio::time::sleep(delay).await;
        }
        self.connect().await
    }

    /// Poll for one snapshot, transparently reconnecting on a dead socket.
    pub async fn try_recv(&mut self) -> Option<OrderbookSnapshot> {
        if self.state == ConnectionState::Failed {
            return None;
        }
        if self.state == ConnectionState::Reconnecting {
            if let Err(e) = self.try_reconnect().await {
                warn!(error = %e, "reconnection failed");
                return None;
            }
        }

        let conn = self.conn.as_mut()?;
        match conn.try_recv().await {
            Ok(Some(snapshot)) => {
                self.empty_polls_since_health_check = 0;
                Some(snapshot)
            }
            Ok(None) => {
                self.empty_polls_since_health_check += 1;
                self.perform_health_check_if_due();
                None
            }
            Err(e) => {
                warn!(error = %e, "feed read failed, marking for reconnection");
                self.conn = None;
                self.state = ConnectionState::Reconnecting;
                None
            }
        }
    }

    fn perform_health_check_if_due(&mut self) {
        if self.last_health_check.elapsed() < self.config.health_check_interval {
            return;
        }
        self.last_health_check = Instant::now();
        if self.empty_polls_since_health_check >= self.config.stale_threshold {
            warn!(empty_polls = self.empty_polls_since_health_check, "connection appears stale, reconnecting");
            self.state = ConnectionState::Reconnecting;
            self.conn = None;
        }
        self.empty_polls_since_health_check = 0;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn reconnection_stats(&self) -> &ReconnectionStats {
        &self.stats
    }

    pub fn connection_uptime(&self) -> Duration {
        self.connection_established_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub async fn force_reconnect(&mut self) -> Result<()> {
        info!("forcing feed reconnection");
        self.conn = None;
        self.state = ConnectionState::Reconnecting;
        self.backoff.reset();
        self.try_reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyConnection {
        calls: Arc<AtomicUsize>,
        fail_first_n_connects: usize,
    }

    #[async_trait::async_trait]
    impl FeedConnection for FlakyConnection {
        async fn connect(_symbols: &[String]) -> Result<Self> {
            static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
            let attempt = ATTEMPTS.fetch_add(1, Ordering::SeqCst);
            if attempt < 1 {
                anyhow::bail!("simulated connect failure");
            }
            Ok(Self { calls: Arc::new(AtomicUsize::new(0)), fail_first_n_connects: 0 })
        }

        async fn try_recv(&mut self) -> Result<Option<OrderbookSnapshot>> {
            let _ = self.fail_first_n_connects;
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Ok(Some(OrderbookSnapshot { symbol: "BTCUSDT".into(), bids: vec![(100.0, 1.0)], asks: vec![(101.0, 1.0)] }));
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn reconnects_after_an_initial_connect_failure() {
        let config = ResilientFeedConfig {
            symbols: vec!["BTCUSDT".into()],
            backoff_config: BackoffConfig { initial_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5), multiplier: 2.0, max_retries: Some(5), jitter_factor: 0.0 },
            ..Default::default()
        };
        let feed = ResilientMarketFeed::<FlakyConnection>::new(config).await;
        assert!(feed.is_ok());
    }

    #[test]
    fn reconnection_stats_default_to_zero() {
        let stats = ReconnectionStats::default();
        assert_eq!(stats.reconnection_attempts, 0);
        assert_eq!(stats.successful_reconnections, 0);
        assert_eq!(stats.failed_reconnections, 0);
    }
}
