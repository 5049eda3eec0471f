use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level runtime configuration (§6, §7). Loaded from a TOML file with
/// `ENGINE__` environment variable overrides layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub execution: ExecutionConfig,
    pub risk: RiskConfig,
    pub router: RouterConfig,
    pub metrics: MetricsConfig,
    pub monitoring: MonitoringConfig,
    pub alerts: AlertConfig,
    pub persistence: PersistenceConfig,
}

/// Exchange connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub api_url: String,
    pub ws_url: String,
    pub api_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

/// Execution mode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// "live" or "paper".
    pub mode: String,
    /// Recover open orders/positions from `persistence` on startup.
    #[serde(default = "default_true")]
    pub recover_on_startup: bool,
}

/// Default risk rules (§4.6), overridable per account at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_max_notional_per_trade")]
    pub max_notional_per_trade: Decimal,
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: Decimal,
    #[serde(default = "default_liquidation_threshold")]
    pub liquidation_threshold: f64,
    #[serde(default = "default_maint_rate")]
    pub maintenance_margin_rate: f64,
}

/// Command-queue broker configuration (§4.15, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub broker_url: String,
    #[serde(default = "default_reply_ttl")]
    pub reply_ttl_secs: u64,
}

/// Prometheus/log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { prometheus_port: default_prometheus_port(), log_level: default_log_level(), json_logs: false }
    }
}

/// Monitoring/observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enable_prometheus: bool,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { enable_prometheus: true, metrics_addr: default_metrics_addr(), metrics_path: default_metrics_path() }
    }
}

/// Alert configuration — console/webhook sinks over the same events the
/// monitoring layer reads (ADL triggers, order failures, max-distance
/// cancels).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_true")]
    pub enable_alerts: bool,
    #[serde(default = "default_true")]
    pub console_output: bool,
    #[serde(default = "default_console_severity")]
    pub console_min_severity: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_severity")]
    pub webhook_min_severity: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enable_alerts: true,
            console_output: true,
            console_min_severity: default_console_severity(),
            webhook_url: None,
            webhook_min_severity: default_webhook_severity(),
            rate_limit_secs: default_rate_limit(),
        }
    }
}

/// Durable storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// "memory" (paper mode / tests) or "postgres".
    #[serde(default = "default_persistence_backend")]
    pub backend: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { backend: default_persistence_backend(), database_url: None }
    }
}

fn default_true() -> bool {
    true
}
fn default_requests_per_window() -> u32 {
    20
}
fn default_window_ms() -> u64 {
    1_000
}
fn default_max_leverage() -> u32 {
    100
}
fn default_max_notional_per_trade() -> Decimal {
    Decimal::new(200, 0)
}
fn default_max_total_exposure() -> Decimal {
    Decimal::new(500, 0)
}
fn default_liquidation_threshold() -> f64 {
    0.90
}
fn default_maint_rate() -> f64 {
    0.005
}
fn default_reply_ttl() -> u64 {
    30
}
fn default_prometheus_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}
fn default_console_severity() -> String {
    "warning".to_string()
}
fn default_webhook_severity() -> String {
    "critical".to_string()
}
fn default_rate_limit() -> u64 {
    60
}
fn default_persistence_backend() -> String {
    "memory".to_string()
}
