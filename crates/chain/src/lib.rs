//! Liquidator chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the perpetual engine (positions, lifecycle events, custom errors)
//! - Provider management for HTTP reads, log queries and WebSocket subscriptions
//! - Transaction signing and sending with a cached nonce
//! - Gas strategy abstraction (Legacy + EIP-1559)
//! - Capability traits ([`EventSource`], [`PositionReader`], [`LiquidationSubmitter`])
//!   so the core services can run against in-memory doubles

mod capabilities;
mod contracts;
mod error;
mod events;
pub mod gas;
mod provider;
mod signer;

pub use capabilities::{
    EventSource, EventStream, LiquidationReceipt, LiquidationSubmitter, PositionReader,
};
pub use contracts::{encode_liquidate, event_signatures, IPerpEngine, PositionView};
pub use error::ChainError;
pub use events::{
    find_liquidation_reward, parse_position_event, EventKind, EventListener, PositionEvent,
};
pub use provider::ProviderManager;
pub use signer::{NonceManager, TransactionSender, TransactionSenderBuilder};
