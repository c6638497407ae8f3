//! Liquidator core logic.
//!
//! This crate provides the core liquidation bot functionality:
//! - Configuration (bot profiles, chain settings)
//! - Durable state store (Redis, in-memory, no-op)
//! - Tracked-position set reconciled from event history and live events
//! - Batched eligibility checks with sequential liquidation dispatch
//! - Liquidation execution with gas ceiling and outcome classification
//! - Orchestration for persistent and single-shot lifetimes

pub mod config;
mod liquidator;
mod monitor;
mod orchestrator;
mod position_tracker;
mod store;

#[cfg(test)]
mod test_support;

pub use config::{BotConfig, ChainSettings, ConfigError};
pub use liquidator::{FailureKind, LiquidationHandler, LiquidationOutcome, LiquidationService};
pub use monitor::{CheckReport, MonitorService};
pub use orchestrator::Orchestrator;
pub use position_tracker::{BackfillCursor, BackfillReport, PositionTracker, TrackerStats};
pub use store::{MemoryStore, NoopStore, RedisStore, StateStore, StoreError, StoreKeys};
