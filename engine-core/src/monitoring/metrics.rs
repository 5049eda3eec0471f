//! Prometheus metrics for the execution engine: order/fill activity, risk
//! exposure, and system health (feed/gateway connectivity, queue depth).

use prometheus::{Counter, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::info;

/// Central registry owning every metric family the engine exports.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,
    trading: Arc<TradingMetrics>,
    risk: Arc<RiskMetrics>,
    system: Arc<SystemMetrics>,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());
        let trading = Arc::new(TradingMetrics::new(&registry)?);
        let risk = Arc::new(RiskMetrics::new(&registry)?);
        let system = Arc::new(SystemMetrics::new(&registry)?);
        info!("prometheus metrics registry initialized");
        Ok(Self { registry, trading, risk, system })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn trading(&self) -> &TradingMetrics {
        &self.trading
    }

    pub fn risk(&self) -> &RiskMetrics {
        &self.risk
    }

    pub fn system(&self) -> &SystemMetrics {
        &self.system
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("FATAL: failed to create metrics registry: {}", e);
            panic!("cannot create metrics registry")
        })
    }
}

/// Order and fill activity, by symbol/side and by failure reason.
pub struct TradingMetrics {
    pub orders_total: IntCounterVec,
    pub fills_total: IntCounterVec,
    pub volume_usd_total: Counter,
    pub rejections_total: IntCounterVec,
    pub cancellations_total: IntCounterVec,
    pub orders_by_status: IntGaugeVec,
    pub adl_closes_total: IntCounterVec,
}

impl TradingMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let orders_total =
            IntCounterVec::new(Opts::new("orders_total", "Total orders submitted").namespace("engine"), &["symbol", "side", "type"])?;
        registry.register(Box::new(orders_total.clone()))?;

        let fills_total = IntCounterVec::new(Opts::new("fills_total", "Total fills received").namespace("engine"), &["symbol", "side"])?;
        registry.register(Box::new(fills_total.clone()))?;

        let volume_usd_total = Counter::new("engine_volume_usd_total", "Total executed notional in USD")?;
        registry.register(Box::new(volume_usd_total.clone()))?;

        let rejections_total =
            IntCounterVec::new(Opts::new("rejections_total", "Total pre-trade validation rejections").namespace("engine"), &["reason"])?;
        registry.register(Box::new(rejections_total.clone()))?;

        let cancellations_total =
            IntCounterVec::new(Opts::new("cancellations_total", "Total order cancellations").namespace("engine"), &["symbol", "reason"])?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let orders_by_status =
            IntGaugeVec::new(Opts::new("orders_by_status", "Current order count by status").namespace("engine"), &["status"])?;
        registry.register(Box::new(orders_by_status.clone()))?;

        let adl_closes_total =
            IntCounterVec::new(Opts::new("adl_closes_total", "Total positions closed by ADL liquidation").namespace("engine"), &["tier"])?;
        registry.register(Box::new(adl_closes_total.clone()))?;

        Ok(Self { orders_total, fills_total, volume_usd_total, rejections_total, cancellations_total, orders_by_status, adl_closes_total })
    }
}

/// Aggregate risk exposure across accounts.
pub struct RiskMetrics {
    pub margin_usage_ratio: Gauge,
    pub total_unrealized_pnl_usd: Gauge,
    pub total_exposure_usd: Gauge,
    pub open_positions: IntGauge,
    pub accounts_near_liquidation: IntGauge,
}

impl RiskMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let margin_usage_ratio = Gauge::new("engine_risk_margin_usage_ratio", "Highest margin usage ratio across accounts")?;
        registry.register(Box::new(margin_usage_ratio.clone()))?;

        let total_unrealized_pnl_usd = Gauge::new("engine_risk_total_unrealized_pnl_usd", "Sum of unrealized PnL across accounts, in USD")?;
        registry.register(Box::new(total_unrealized_pnl_usd.clone()))?;

        let total_exposure_usd = Gauge::new("engine_risk_total_exposure_usd", "Sum of open-position notional across accounts, in USD")?;
        registry.register(Box::new(total_exposure_usd.clone()))?;

        let open_positions = IntGauge::new("engine_risk_open_positions", "Number of currently open positions")?;
        registry.register(Box::new(open_positions.clone()))?;

        let accounts_near_liquidation =
            IntGauge::new("engine_risk_accounts_near_liquidation", "Accounts above the first ADL tier threshold")?;
        registry.register(Box::new(accounts_near_liquidation.clone()))?;

        Ok(Self { margin_usage_ratio, total_unrealized_pnl_usd, total_exposure_usd, open_positions, accounts_near_liquidation })
    }
}

/// Connectivity and queue health.
pub struct SystemMetrics {
    pub feed_connected: IntGauge,
    pub feed_messages_total: IntCounter,
    pub gateway_connected: IntGauge,
    pub command_queue_depth: IntGaugeVec,
    pub errors_total: IntCounterVec,
}

impl SystemMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let feed_connected = IntGauge::new("engine_system_feed_connected", "Market-data feed connection status (1=connected)")?;
        registry.register(Box::new(feed_connected.clone()))?;

        let feed_messages_total = IntCounter::new("engine_system_feed_messages_total", "Total market-data messages received")?;
        registry.register(Box::new(feed_messages_total.clone()))?;

        let gateway_connected = IntGauge::new("engine_system_gateway_connected", "Exchange gateway connection status (1=connected)")?;
        registry.register(Box::new(gateway_connected.clone()))?;

        let command_queue_depth =
            IntGaugeVec::new(Opts::new("system_command_queue_depth", "Depth of each inbound command queue").namespace("engine"), &["queue"])?;
        registry.register(Box::new(command_queue_depth.clone()))?;

        let errors_total = IntCounterVec::new(Opts::new("system_errors_total", "Total errors by component").namespace("engine"), &["component"])?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self { feed_connected, feed_messages_total, gateway_connected, command_queue_depth, errors_total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_creation_registers_all_families() {
        let metrics = EngineMetrics::new().unwrap();
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn trading_metrics_are_recordable() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.trading().orders_total.with_label_values(&["BTCUSDT", "buy", "limit"]).inc();
        metrics.trading().fills_total.with_label_values(&["BTCUSDT", "buy"]).inc();
        metrics.trading().volume_usd_total.inc_by(50_000.0);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn risk_metrics_are_recordable() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.risk().margin_usage_ratio.set(0.42);
        metrics.risk().total_unrealized_pnl_usd.set(123.0);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn system_metrics_are_recordable() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.system().feed_connected.set(1);
        metrics.system().command_queue_depth.with_label_values(&["cmd:trade"]).set(3);
        assert!(!metrics.registry().gather().is_empty());
    }
}
