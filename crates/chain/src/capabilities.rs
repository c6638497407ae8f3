//! Capability traits consumed by the core services.
//!
//! The concrete implementations live in [`crate::ProviderManager`] and
//! [`crate::TransactionSender`]; tests substitute in-memory doubles.

use std::pin::Pin;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures::stream::Stream;

use crate::contracts::PositionView;
use crate::error::ChainError;
use crate::events::{EventKind, PositionEvent};

/// Boxed stream of live lifecycle events.
pub type EventStream = Pin<Box<dyn Stream<Item = PositionEvent> + Send>>;

/// Historical and live access to position lifecycle events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Events of one kind emitted in `[from_block, to_block]`.
    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PositionEvent>, ChainError>;

    /// Live stream of all lifecycle events.
    async fn subscribe(&self) -> Result<EventStream, ChainError>;
}

/// Read-only contract views.
#[async_trait]
pub trait PositionReader: Send + Sync {
    async fn position(&self, user: Address) -> Result<PositionView, ChainError>;

    async fn is_liquidatable(&self, user: Address) -> Result<bool, ChainError>;
}

/// Confirmed result of a submitted liquidation.
#[derive(Debug, Clone)]
pub struct LiquidationReceipt {
    pub tx_hash: B256,
    /// Receipt status; false means the transaction reverted on-chain.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// Reward carried by the `PositionLiquidated` event, if emitted.
    pub reward: Option<U256>,
}

/// Signing and submission of liquidation transactions.
#[async_trait]
pub trait LiquidationSubmitter: Send + Sync {
    /// Current network fee estimate per gas, in wei.
    async fn fee_estimate(&self) -> Result<u128, ChainError>;

    /// Submit `liquidate(user)` and wait up to `timeout` for the receipt.
    async fn submit_liquidation(
        &self,
        user: Address,
        timeout: Duration,
    ) -> Result<LiquidationReceipt, ChainError>;
}
