//! Typed chain errors and liquidation failure classification.
//!
//! Reverts are classified from the engine's custom errors when revert data is
//! available. Node-level failures (funding, nonce) and reverts from contracts
//! that only return a reason string fall back to message inspection.

use std::sync::OnceLock;
use std::time::Duration;

use alloy::primitives::Bytes;
use alloy::sol_types::SolInterface;
use regex_lite::Regex;
use thiserror::Error;

use crate::contracts::IPerpEngine::IPerpEngineErrors;

/// Errors surfaced by the chain layer.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC endpoint unreachable or connection setup failed.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Generic RPC or contract call failure.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The position no longer exists or is no longer eligible.
    #[error("{0}")]
    NotLiquidatable(String),

    /// The signer cannot pay for gas.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Confirmation did not arrive in time.
    #[error("timed out after {0:?} waiting for confirmation")]
    Timeout(Duration),

    /// Live subscriptions need a WebSocket endpoint.
    #[error("event subscription unavailable: {0}")]
    SubscriptionUnavailable(String),
}

impl ChainError {
    /// Classify a raw error message. Last-resort path when no revert data exists.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if stale_pattern().is_match(&message) {
            ChainError::NotLiquidatable(message)
        } else if funds_pattern().is_match(&message) {
            ChainError::InsufficientFunds(message)
        } else {
            ChainError::Rpc(message)
        }
    }

    /// Classify ABI-encoded revert data against the engine's custom errors.
    pub fn from_revert_data(data: &Bytes, message: impl Into<String>) -> Self {
        let message = message.into();
        match IPerpEngineErrors::abi_decode(data, true) {
            Ok(IPerpEngineErrors::PositionNotLiquidatable(e)) => {
                ChainError::NotLiquidatable(format!("Position not liquidatable: {}", e.user))
            }
            Ok(IPerpEngineErrors::NoPosition(e)) => {
                ChainError::NotLiquidatable(format!("No position for {}", e.user))
            }
            Ok(IPerpEngineErrors::InsufficientMargin(e)) => ChainError::Rpc(format!(
                "insufficient margin: required {}, available {}",
                e.required, e.available
            )),
            Err(_) => Self::from_message(message),
        }
    }

    /// Classify an alloy contract error, preferring decoded revert data.
    pub fn from_contract_error(err: alloy::contract::Error) -> Self {
        let message = err.to_string();
        match err.as_revert_data() {
            Some(data) => Self::from_revert_data(&data, message),
            None => Self::from_message(message),
        }
    }

    /// Classify a transport error, preferring decoded revert data.
    pub fn from_transport_error(err: alloy::transports::TransportError) -> Self {
        let message = err.to_string();
        match err.as_error_resp().and_then(|payload| payload.as_revert_data()) {
            Some(data) => Self::from_revert_data(&data, message),
            None => Self::from_message(message),
        }
    }

    /// The address should be dropped from tracking.
    pub fn is_stale(&self) -> bool {
        matches!(self, ChainError::NotLiquidatable(_))
    }

    /// The signer must be funded before any further submission succeeds.
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, ChainError::InsufficientFunds(_))
    }
}

fn stale_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)not liquidatable|no position|position does not exist")
            .expect("valid stale pattern")
    })
}

fn funds_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)insufficient funds").expect("valid funds pattern"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::IPerpEngine;
    use alloy::primitives::{Address, U256};
    use alloy::sol_types::SolError;

    #[test]
    fn test_message_classification() {
        let err = ChainError::from_message("execution reverted: Position not liquidatable");
        assert!(err.is_stale());
        assert!(err.to_string().contains("Position not liquidatable"));

        let err = ChainError::from_message("execution reverted: No position");
        assert!(err.is_stale());

        let err = ChainError::from_message(
            "insufficient funds for gas * price + value: have 0 want 1000",
        );
        assert!(err.is_insufficient_funds());
        assert!(!err.is_stale());

        let err = ChainError::from_message("nonce too low");
        assert!(matches!(err, ChainError::Rpc(_)));
    }

    #[test]
    fn test_revert_data_classification() {
        let user = Address::repeat_byte(0xC0);
        let data = Bytes::from(IPerpEngine::PositionNotLiquidatable { user }.abi_encode());
        let err = ChainError::from_revert_data(&data, "execution reverted");
        assert!(err.is_stale());
        assert!(err.to_string().contains("Position not liquidatable"));

        let data = Bytes::from(IPerpEngine::NoPosition { user }.abi_encode());
        assert!(ChainError::from_revert_data(&data, "execution reverted").is_stale());

        let data = Bytes::from(
            IPerpEngine::InsufficientMargin {
                required: U256::from(10u64),
                available: U256::from(1u64),
            }
            .abi_encode(),
        );
        let err = ChainError::from_revert_data(&data, "execution reverted");
        assert!(matches!(err, ChainError::Rpc(_)));
    }

    #[test]
    fn test_unknown_revert_data_falls_back_to_message() {
        let data = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let err = ChainError::from_revert_data(&data, "reverted: position does not exist");
        assert!(err.is_stale());
    }
}
