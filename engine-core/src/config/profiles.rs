//! Pre-built configuration profiles for local development, staging, and
//! production deployments.

use rust_decimal_macros::dec;

use super::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileName {
    Development,
    Staging,
    Production,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Some(Self::Development),
            "staging" | "stage" => Some(Self::Staging),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }
}

pub struct ConfigProfile;

impl ConfigProfile {
    /// Paper execution, relaxed risk limits, debug logging.
    pub fn development() -> Config {
        Config {
            gateway: GatewayConfig {
                api_url: "https://testnet.exchange.example/api".to_string(),
                ws_url: "wss://testnet.exchange.example/ws".to_string(),
                api_key: None,
                private_key_path: None,
                requests_per_window: 20,
                window_ms: 1_000,
            },
            execution: ExecutionConfig { mode: "paper".to_string(), recover_on_startup: false },
            risk: RiskConfig {
                max_leverage: 20,
                max_notional_per_trade: dec!(50.0),
                max_total_exposure: dec!(200.0),
                liquidation_threshold: 0.90,
                maintenance_margin_rate: 0.005,
            },
            router: RouterConfig { broker_url: "redis://127.0.0.1:6379".to_string(), reply_ttl_secs: 30 },
            metrics: MetricsConfig { prometheus_port: 9090, log_level: "debug".to_string(), json_logs: false },
            monitoring: MonitoringConfig {
                enable_prometheus: true,
                metrics_addr: "127.0.0.1:9090".to_string(),
                metrics_path: "/metrics".to_string(),
            },
            alerts: AlertConfig {
                enable_alerts: true,
                console_output: true,
                console_min_severity: "info".to_string(),
                webhook_url: None,
                webhook_min_severity: "critical".to_string(),
                rate_limit_secs: 10,
            },
            persistence: PersistenceConfig { backend: "memory".to_string(), database_url: None },
        }
    }

    /// Live execution against a testnet-adjacent venue, production-like
    /// limits at reduced scale.
    pub fn staging() -> Config {
        Config {
            gateway: GatewayConfig {
                api_url: "https://staging.exchange.example/api".to_string(),
                ws_url: "wss://staging.exchange.example/ws".to_string(),
                api_key: None,
                private_key_path: None,
                requests_per_window: 20,
                window_ms: 1_000,
            },
            execution: ExecutionConfig { mode: "live".to_string(), recover_on_startup: true },
            risk: RiskConfig {
                max_leverage: 50,
                max_notional_per_trade: dec!(100.0),
                max_total_exposure: dec!(300.0),
                liquidation_threshold: 0.90,
                maintenance_margin_rate: 0.005,
            },
            router: RouterConfig { broker_url: "redis://staging-broker:6379".to_string(), reply_ttl_secs: 30 },
            metrics: MetricsConfig { prometheus_port: 9090, log_level: "info".to_string(), json_logs: true },
            monitoring: MonitoringConfig {
                enable_prometheus: true,
                metrics_addr: "0.0.0.0:9090".to_string(),
                metrics_path: "/metrics".to_string(),
            },
            alerts: AlertConfig {
                enable_alerts: true,
                console_output: true,
                console_min_severity: "warning".to_string(),
                webhook_url: Some("https://hooks.slack.com/staging-alerts".to_string()),
                webhook_min_severity: "error".to_string(),
                rate_limit_secs: 60,
            },
            persistence: PersistenceConfig { backend: "postgres".to_string(), database_url: None },
        }
    }

    /// Live execution, strict limits, warning-level console output.
    pub fn production() -> Config {
        Config {
            gateway: GatewayConfig {
                api_url: "https://exchange.example/api".to_string(),
                ws_url: "wss://exchange.example/ws".to_string(),
                api_key: None,
                private_key_path: None,
                requests_per_window: 20,
                window_ms: 1_000,
            },
            execution: ExecutionConfig { mode: "live".to_string(), recover_on_startup: true },
            risk: RiskConfig {
                max_leverage: 100,
                max_notional_per_trade: dec!(200.0),
                max_total_exposure: dec!(500.0),
                liquidation_threshold: 0.90,
                maintenance_margin_rate: 0.005,
            },
            router: RouterConfig { broker_url: "redis://prod-broker:6379".to_string(), reply_ttl_secs: 30 },
            metrics: MetricsConfig { prometheus_port: 9090, log_level: "warn".to_string(), json_logs: true },
            monitoring: MonitoringConfig {
                enable_prometheus: true,
                metrics_addr: "0.0.0.0:9090".to_string(),
                metrics_path: "/metrics".to_string(),
            },
            alerts: AlertConfig {
                enable_alerts: true,
                console_output: true,
                console_min_severity: "error".to_string(),
                webhook_url: Some("https://hooks.pagerduty.com/production-critical".to_string()),
                webhook_min_severity: "critical".to_string(),
                rate_limit_secs: 60,
            },
            persistence: PersistenceConfig { backend: "postgres".to_string(), database_url: None },
        }
    }

    pub fn load(profile: ProfileName) -> Config {
        match profile {
            ProfileName::Development => Self::development(),
            ProfileName::Staging => Self::staging(),
            ProfileName::Production => Self::production(),
        }
    }

    /// Load by `ENGINE_PROFILE` environment variable, defaulting to
    /// development.
    pub fn from_env() -> Config {
        let profile = std::env::var("ENGINE_PROFILE").ok().and_then(|s| ProfileName::from_str(&s)).unwrap_or(ProfileName::Development);
        Self::load(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_name_round_trips_through_str() {
        assert_eq!(ProfileName::from_str("dev"), Some(ProfileName::Development));
        assert_eq!(ProfileName::from_str("staging"), Some(ProfileName::Staging));
        assert_eq!(ProfileName::from_str("production"), Some(ProfileName::Production));
        assert_eq!(ProfileName::from_str("bogus"), None);
    }

    #[test]
    fn development_is_paper_mode_with_relaxed_limits() {
        let config = ConfigProfile::development();
        assert_eq!(config.execution.mode, "paper");
        assert_eq!(config.metrics.log_level, "debug");
        assert!(!config.execution.recover_on_startup);
    }

    #[test]
    fn production_is_live_mode_with_strict_alerting() {
        let config = ConfigProfile::production();
        assert_eq!(config.execution.mode, "live");
        assert_eq!(config.alerts.console_min_severity, "error");
        assert!(config.metrics.json_logs);
    }

    #[test]
    fn all_profiles_validate() {
        assert!(ConfigProfile::development().validate().is_ok());
        assert!(ConfigProfile::staging().validate().is_ok());
        assert!(ConfigProfile::production().validate().is_ok());
    }
}
