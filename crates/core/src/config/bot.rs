//! Bot runtime configuration with profile support.
//!
//! Provides the tunables for monitoring, backfill and liquidation with
//! support for different profiles (default, testing, production).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ConfigError;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Check loop timing and batching
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Event history reconciliation
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Liquidation execution parameters
    #[serde(default)]
    pub liquidation: LiquidationConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Check loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between checks in persistent mode (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Addresses read concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive liquidation submissions (milliseconds)
    #[serde(default = "default_liquidation_delay_ms")]
    pub liquidation_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    10_000
}
fn default_batch_size() -> usize {
    10
}
fn default_liquidation_delay_ms() -> u64 {
    1_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_size: default_batch_size(),
            liquidation_delay_ms: default_liquidation_delay_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
    pub fn liquidation_delay(&self) -> Duration {
        Duration::from_millis(self.liquidation_delay_ms)
    }
}

/// Backfill configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Lookback for a full backfill (blocks)
    #[serde(default = "default_block_range")]
    pub block_range: u64,

    /// Maximum blocks per `eth_getLogs` request
    #[serde(default = "default_log_chunk_size")]
    pub log_chunk_size: u64,
}

fn default_block_range() -> u64 {
    10_000
}
fn default_log_chunk_size() -> u64 {
    2_000
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            block_range: default_block_range(),
            log_chunk_size: default_log_chunk_size(),
        }
    }
}

/// Liquidation execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Skip submissions while the network fee is above this (gwei). Unset disables the check.
    #[serde(default)]
    pub max_gas_price_gwei: Option<f64>,

    /// How long to wait for a receipt (seconds)
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Pricing model ("legacy" or "eip1559")
    #[serde(default = "default_gas_pricing")]
    pub gas_pricing: String,

    /// EIP-1559 tip when the node offers no suggestion (gwei)
    #[serde(default = "default_priority_fee")]
    pub priority_fee_gwei: f64,

    /// EIP-1559 headroom over the latest base fee
    #[serde(default = "default_base_fee_multiplier")]
    pub base_fee_multiplier: f64,

    /// Headroom applied to gas estimates
    #[serde(default = "default_gas_limit_multiplier")]
    pub gas_limit_multiplier: f64,
}

fn default_confirmation_timeout() -> u64 {
    120
}
fn default_gas_pricing() -> String {
    "legacy".to_string()
}
fn default_priority_fee() -> f64 {
    0.1
}
fn default_base_fee_multiplier() -> f64 {
    1.5
}
fn default_gas_limit_multiplier() -> f64 {
    1.2
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            max_gas_price_gwei: None,
            confirmation_timeout_secs: default_confirmation_timeout(),
            gas_pricing: default_gas_pricing(),
            priority_fee_gwei: default_priority_fee(),
            base_fee_multiplier: default_base_fee_multiplier(),
            gas_limit_multiplier: default_gas_limit_multiplier(),
        }
    }
}

impl LiquidationConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            monitor: MonitorConfig::default(),
            backfill: BackfillConfig::default(),
            liquidation: LiquidationConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Short intervals and a narrow lookback for local nodes.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            monitor: MonitorConfig {
                interval_ms: 2_000,
                batch_size: 5,
                liquidation_delay_ms: 200,
            },
            backfill: BackfillConfig {
                block_range: 1_000,
                log_chunk_size: 500,
            },
            liquidation: LiquidationConfig {
                confirmation_timeout_secs: 30,
                ..Default::default()
            },
        }
    }

    /// Conservative settings with a gas ceiling.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            monitor: MonitorConfig {
                interval_ms: 5_000,
                ..Default::default()
            },
            backfill: BackfillConfig {
                block_range: 50_000,
                log_chunk_size: 2_000,
            },
            liquidation: LiquidationConfig {
                max_gas_price_gwei: Some(50.0),
                gas_pricing: "eip1559".to_string(),
                ..Default::default()
            },
        }
    }

    /// Resolve the profile from `BOT_PROFILE`, then apply env overrides.
    ///
    /// `BOT_PROFILE` is a profile name (default, testing, production) or a
    /// path to a TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        let mut config = match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "default" | "" => Self::default(),
            _ if profile.ends_with(".toml") => Self::from_file(&profile)?,
            other => {
                return Err(ConfigError::Invalid {
                    key: "BOT_PROFILE",
                    message: format!("unknown profile '{other}'"),
                })
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MONITOR_INTERVAL_MS`, `MAX_GAS_PRICE_GWEI` and `BACKFILL_BLOCK_RANGE`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MONITOR_INTERVAL_MS") {
            self.monitor.interval_ms = parse_value("MONITOR_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("MAX_GAS_PRICE_GWEI") {
            self.liquidation.max_gas_price_gwei = if value.trim().is_empty() {
                None
            } else {
                Some(parse_value("MAX_GAS_PRICE_GWEI", &value)?)
            };
        }
        if let Some(value) = lookup("BACKFILL_BLOCK_RANGE") {
            self.backfill.block_range = parse_value("BACKFILL_BLOCK_RANGE", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "monitor.interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.monitor.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "monitor.batch_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.backfill.log_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "backfill.log_chunk_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if matches!(self.liquidation.max_gas_price_gwei, Some(g) if g <= 0.0) {
            return Err(ConfigError::Invalid {
                key: "liquidation.max_gas_price_gwei",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            interval_ms = self.monitor.interval_ms,
            batch_size = self.monitor.batch_size,
            liquidation_delay_ms = self.monitor.liquidation_delay_ms,
            "Monitor settings"
        );
        tracing::info!(
            block_range = self.backfill.block_range,
            log_chunk_size = self.backfill.log_chunk_size,
            "Backfill settings"
        );
        tracing::info!(
            max_gas_price_gwei = ?self.liquidation.max_gas_price_gwei,
            confirmation_timeout_secs = self.liquidation.confirmation_timeout_secs,
            gas_pricing = %self.liquidation.gas_pricing,
            "Liquidation parameters"
        );
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("'{value}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.monitor.batch_size, 10);
        assert_eq!(config.monitor.liquidation_delay(), Duration::from_secs(1));
        assert_eq!(config.liquidation.confirmation_timeout(), Duration::from_secs(120));
        assert!(config.liquidation.max_gas_price_gwei.is_none());
    }

    #[test]
    fn test_production_profile() {
        let config = BotConfig::production();
        assert_eq!(config.profile, "production");
        assert_eq!(config.liquidation.max_gas_price_gwei, Some(50.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MONITOR_INTERVAL_MS", "2500"),
            ("MAX_GAS_PRICE_GWEI", "75.5"),
            ("BACKFILL_BLOCK_RANGE", "123"),
        ]
        .into_iter()
        .collect();

        let mut config = BotConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.monitor.interval(), Duration::from_millis(2500));
        assert_eq!(config.liquidation.max_gas_price_gwei, Some(75.5));
        assert_eq!(config.backfill.block_range, 123);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = BotConfig::default();
        let err = config
            .apply_overrides(|key| (key == "MONITOR_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MONITOR_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_batch_size_invalid() {
        let mut config = BotConfig::default();
        config.monitor.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: BotConfig = toml::from_str(
            r#"
            profile = "custom"

            [liquidation]
            max_gas_price_gwei = 20.0
            "#,
        )
        .unwrap();

        assert_eq!(parsed.profile, "custom");
        assert_eq!(parsed.liquidation.max_gas_price_gwei, Some(20.0));
        assert_eq!(parsed.monitor.batch_size, 10);
        assert_eq!(parsed.backfill.block_range, 10_000);
    }
}
