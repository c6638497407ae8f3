//! Configuration for the liquidation bot.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, intervals, batching, gas ceiling)
//! - Chain settings (RPC endpoints, signer key, engine address, store URL)

mod bot;
mod chain;

use thiserror::Error;

pub use bot::{BackfillConfig, BotConfig, LiquidationConfig, MonitorConfig};
pub use chain::{ChainSettings, DeploymentDetails, DeploymentFile};

/// Missing or malformed configuration. Fatal before any work begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },
}
