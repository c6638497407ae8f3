//! Legacy gas pricing (single `gasPrice` field).

use super::{GasParams, GasStrategy};
use crate::error::ChainError;
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

/// Legacy gas pricing strategy backed by `eth_gasPrice`.
#[derive(Debug, Default)]
pub struct LegacyGasStrategy;

impl LegacyGasStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams, ChainError> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Connectivity(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);
        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(ChainError::from_transport_error)?;

        Ok(GasParams::Legacy { gas_price })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        tx.set_gas_price(params.effective_gas_price());
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::GWEI;
    use alloy::primitives::Address;

    #[test]
    fn test_legacy_apply_gas() {
        let strategy = LegacyGasStrategy::new();
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        strategy.apply_gas(&mut tx, &GasParams::Legacy { gas_price: 5 * GWEI });
        assert_eq!(tx.gas_price(), Some(5 * GWEI));
    }

    #[test]
    fn test_legacy_apply_eip1559_params() {
        let strategy = LegacyGasStrategy::new();
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        let params = GasParams::Eip1559 {
            max_fee_per_gas: 40 * GWEI,
            max_priority_fee_per_gas: 2 * GWEI,
            base_fee: 19 * GWEI,
        };
        strategy.apply_gas(&mut tx, &params);
        assert_eq!(tx.gas_price(), Some(40 * GWEI));
    }
}
