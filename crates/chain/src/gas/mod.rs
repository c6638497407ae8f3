//! Gas pricing strategies.
//!
//! A strategy reports the network's current fee estimate and applies it to a
//! transaction request. Strategies never clamp the estimate: the liquidation
//! service compares it against the configured ceiling and skips the attempt
//! instead of submitting an underpriced transaction.
//!
//! ```rust,ignore
//! use liquidator_chain::gas::{create_gas_strategy, GasStrategy};
//!
//! let strategy = create_gas_strategy("eip1559", 2.0, 1.5);
//! let params = strategy.fetch_params(rpc_url).await?;
//! let fee_wei = params.effective_gas_price();
//! ```

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::ChainError;

/// Wei per gwei.
pub const GWEI: u128 = 1_000_000_000;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    /// Legacy gas pricing (pre-EIP-1559).
    Legacy { gas_price: u128 },
    /// EIP-1559 gas pricing.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        base_fee: u128,
    },
}

impl GasParams {
    /// Fee per gas the transaction may pay, in wei.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Trait for gas pricing strategies.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Fetch current gas parameters from the given RPC URL.
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams, ChainError>;

    /// Apply gas parameters to a transaction request in place.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    /// Strategy name for logging.
    fn strategy_name(&self) -> &'static str;
}

/// Convert a gwei amount from configuration to wei.
pub fn gwei_to_wei(gwei: f64) -> u128 {
    (gwei.max(0.0) * GWEI as f64) as u128
}

/// Create a gas strategy from the configured pricing model.
///
/// * `pricing_model` - "legacy" or "eip1559" (case-insensitive)
/// * `priority_fee_gwei` - tip used by EIP-1559 when the node has no suggestion
/// * `base_fee_multiplier` - EIP-1559 headroom over the latest base fee
pub fn create_gas_strategy(
    pricing_model: &str,
    priority_fee_gwei: f64,
    base_fee_multiplier: f64,
) -> Box<dyn GasStrategy> {
    match pricing_model.to_lowercase().as_str() {
        "eip1559" | "eip-1559" => Box::new(Eip1559GasStrategy::new(
            gwei_to_wei(priority_fee_gwei),
            base_fee_multiplier,
        )),
        _ => Box::new(LegacyGasStrategy::new()),
    }
}
