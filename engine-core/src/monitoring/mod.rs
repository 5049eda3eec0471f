//! Monitoring and observability: Prometheus metrics export, an HTTP
//! scrape server, and an alerting framework wired to engine events
//! (ADL triggers, order rejections/failures, max-distance chase cancels).

pub mod alerts;
pub mod metrics;
pub mod server;

pub use alerts::{Alert, AlertCategory, AlertId, AlertManager, AlertManagerConfig, AlertOutput, AlertSeverity};
pub use metrics::{EngineMetrics, RiskMetrics, SystemMetrics, TradingMetrics};
pub use server::{MetricsServer, MetricsServerConfig};
