//! EIP-1559 gas pricing (base fee + priority fee).

use super::{GasParams, GasStrategy};
use crate::error::ChainError;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

/// EIP-1559 gas pricing strategy.
///
/// `max_fee_per_gas = base_fee * multiplier + priority_fee`.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Tip in wei when the node offers no suggestion.
    default_priority_fee: u128,
    /// Headroom over the latest base fee (1.5 = 50% buffer).
    base_fee_multiplier: f64,
}

impl Eip1559GasStrategy {
    pub fn new(default_priority_fee: u128, base_fee_multiplier: f64) -> Self {
        Self {
            default_priority_fee,
            base_fee_multiplier,
        }
    }

    fn calculate_max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        ((base_fee as f64) * self.base_fee_multiplier) as u128 + priority_fee
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams, ChainError> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Connectivity(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(ChainError::from_transport_error)?
            .ok_or_else(|| ChainError::Rpc("latest block unavailable".to_string()))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .ok_or_else(|| ChainError::Rpc("chain does not report a base fee".to_string()))?;

        let priority_fee = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(self.default_priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas: self.calculate_max_fee(base_fee, priority_fee),
            max_priority_fee_per_gas: priority_fee,
            base_fee,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                tx.set_max_fee_per_gas(*gas_price);
                tx.set_max_priority_fee_per_gas(self.default_priority_fee.min(*gas_price));
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::GWEI;
    use alloy::primitives::Address;

    #[test]
    fn test_eip1559_max_fee_calculation() {
        let strategy = Eip1559GasStrategy::new(2 * GWEI, 2.0);

        // 30 * 2.0 + 2 = 62 gwei
        assert_eq!(strategy.calculate_max_fee(30 * GWEI, 2 * GWEI), 62 * GWEI);
    }

    #[test]
    fn test_eip1559_apply_gas() {
        let strategy = Eip1559GasStrategy::new(2 * GWEI, 1.5);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        let params = GasParams::Eip1559 {
            max_fee_per_gas: 50 * GWEI,
            max_priority_fee_per_gas: 2 * GWEI,
            base_fee: 30 * GWEI,
        };

        strategy.apply_gas(&mut tx, &params);
        assert_eq!(tx.max_fee_per_gas, Some(50 * GWEI));
        assert_eq!(tx.max_priority_fee_per_gas, Some(2 * GWEI));
    }

    #[test]
    fn test_eip1559_apply_legacy_params_caps_tip() {
        let strategy = Eip1559GasStrategy::new(5 * GWEI, 1.5);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        strategy.apply_gas(&mut tx, &GasParams::Legacy { gas_price: 3 * GWEI });
        assert_eq!(tx.max_fee_per_gas, Some(3 * GWEI));
        assert_eq!(tx.max_priority_fee_per_gas, Some(3 * GWEI));
    }
}
