//! Runtime configuration (§6, §7): one TOML file per deployment plus
//! `ENGINE__`-prefixed environment variable overrides, loaded via the
//! `config` crate. Profiles in [`profiles`] give sane defaults for local
//! development without a file on disk.

pub mod profiles;
pub mod types;

pub use profiles::{ConfigProfile, ProfileName};
pub use types::*;

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use std::path::Path;

impl Config {
    /// Load configuration from a TOML file, with `ENGINE__` environment
    /// variables (double underscore separates nested fields) overriding it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loader = ConfigLoader::builder()
            .set_default("execution.mode", "paper")?
            .set_default("execution.recover_on_startup", true)?
            .set_default("router.reply_ttl_secs", 30)?
            .set_default("metrics.prometheus_port", 9090)?
            .set_default("metrics.log_level", "info")?
            .set_default("metrics.json_logs", false)?
            .set_default("monitoring.enable_prometheus", true)?
            .set_default("monitoring.metrics_addr", "127.0.0.1:9090")?
            .set_default("monitoring.metrics_path", "/metrics")?
            .set_default("alerts.enable_alerts", true)?
            .set_default("alerts.console_output", true)?
            .set_default("alerts.console_min_severity", "warning")?
            .set_default("alerts.webhook_min_severity", "critical")?
            .set_default("alerts.rate_limit_secs", 60)?
            .set_default("persistence.backend", "memory")?
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix("ENGINE").separator("__"))
            .build()
            .context("failed to build configuration")?;

        let cfg: Config = loader.try_deserialize().context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    /// Validate cross-field invariants the deserializer itself can't check.
    pub fn validate(&self) -> Result<()> {
        if self.execution.mode != "live" && self.execution.mode != "paper" {
            anyhow::bail!("invalid execution mode '{}', must be 'live' or 'paper'", self.execution.mode);
        }
        if self.risk.max_leverage == 0 {
            anyhow::bail!("risk.max_leverage must be positive");
        }
        if self.risk.max_notional_per_trade <= rust_decimal::Decimal::ZERO {
            anyhow::bail!("risk.max_notional_per_trade must be positive");
        }
        if self.risk.max_total_exposure < self.risk.max_notional_per_trade {
            anyhow::bail!("risk.max_total_exposure cannot be smaller than max_notional_per_trade");
        }
        if !(0.0..=1.0).contains(&self.risk.liquidation_threshold) {
            anyhow::bail!("risk.liquidation_threshold must be in [0, 1]");
        }
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.metrics.log_level.as_str()) {
            anyhow::bail!("invalid log level '{}', must be one of: {:?}", self.metrics.log_level, valid_log_levels);
        }
        if self.persistence.backend != "memory" && self.persistence.backend != "postgres" {
            anyhow::bail!("invalid persistence backend '{}', must be 'memory' or 'postgres'", self.persistence.backend);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_profile_round_trips_through_validate() {
        assert!(ConfigProfile::development().validate().is_ok());
    }

    #[test]
    fn invalid_execution_mode_is_rejected() {
        let mut config = ConfigProfile::development();
        config.execution.mode = "bogus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn exposure_below_per_trade_cap_is_rejected() {
        let mut config = ConfigProfile::development();
        config.risk.max_total_exposure = config.risk.max_notional_per_trade - rust_decimal::Decimal::ONE;
        assert!(config.validate().is_err());
    }
}
