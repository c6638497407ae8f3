//! Transaction signer and sender for liquidations.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! - Cached nonce: atomic counter avoids an RPC call per transaction
//! - Gas limit from `eth_estimateGas` with a safety multiplier; the estimate
//!   doubles as a pre-flight that surfaces typed reverts before anything is sent
//! - Legacy or EIP-1559 pricing through [`GasStrategy`]

use crate::capabilities::{LiquidationReceipt, LiquidationSubmitter};
use crate::contracts::{encode_liquidate, IPerpEngine};
use crate::error::ChainError;
use crate::events::find_liquidation_reward;
use crate::gas::{GasStrategy, LegacyGasStrategy};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cached nonce manager for fast transaction submission.
pub struct NonceManager {
    /// Next nonce to hand out
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Reset nonce to chain value (use after a failed submission).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Fallback gas limit when estimation fails for a reason other than a revert.
const DEFAULT_LIQUIDATION_GAS_LIMIT: u64 = 500_000;

/// Builder for TransactionSender.
pub struct TransactionSenderBuilder {
    rpc_url: String,
    chain_id: u64,
    contract: Address,
    gas_strategy: Option<Box<dyn GasStrategy>>,
    gas_limit_multiplier: f64,
}

impl TransactionSenderBuilder {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64, contract: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            contract,
            gas_strategy: None,
            gas_limit_multiplier: 1.2,
        }
    }

    pub fn gas_strategy(mut self, strategy: Box<dyn GasStrategy>) -> Self {
        self.gas_strategy = Some(strategy);
        self
    }

    /// Headroom applied to `eth_estimateGas` results.
    pub fn gas_limit_multiplier(mut self, multiplier: f64) -> Self {
        self.gas_limit_multiplier = multiplier.max(1.0);
        self
    }

    /// Build the TransactionSender, fetching the signer's starting nonce.
    pub async fn build(self, private_key: &str) -> Result<TransactionSender, ChainError> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| ChainError::Rpc(format!("invalid private key: {e}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Connectivity(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);
        let initial_nonce = provider
            .get_transaction_count(address)
            .await
            .map_err(|e| ChainError::Connectivity(e.to_string()))?;

        let gas_strategy = self
            .gas_strategy
            .unwrap_or_else(|| Box::new(LegacyGasStrategy::new()));

        info!(
            address = %address,
            chain_id = self.chain_id,
            contract = %self.contract,
            initial_nonce = initial_nonce,
            gas_strategy = gas_strategy.strategy_name(),
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            rpc_url: self.rpc_url,
            wallet,
            address,
            chain_id: self.chain_id,
            contract: self.contract,
            nonce_manager: NonceManager::new(initial_nonce),
            gas_strategy,
            gas_limit_multiplier: self.gas_limit_multiplier,
        })
    }
}

/// Signs and submits liquidation transactions against the engine.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    /// Signer address
    pub address: Address,
    chain_id: u64,
    contract: Address,
    nonce_manager: NonceManager,
    gas_strategy: Box<dyn GasStrategy>,
    gas_limit_multiplier: f64,
}

impl TransactionSender {
    pub fn gas_strategy_name(&self) -> &'static str {
        self.gas_strategy.strategy_name()
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    /// Signer balance in wei.
    pub async fn balance(&self) -> Result<U256, ChainError> {
        let provider = self.read_provider()?;
        provider
            .get_balance(self.address)
            .await
            .map_err(ChainError::from_transport_error)
    }

    /// Resync the cached nonce from the pending pool count (after a failed or dropped tx).
    pub async fn sync_nonce(&self) {
        let provider = match self.read_provider() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Cannot sync nonce");
                return;
            }
        };
        match provider.get_transaction_count(self.address).pending().await {
            Ok(chain_nonce) => {
                self.nonce_manager.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => warn!(error = %e, "Failed to sync nonce from chain"),
        }
    }

    fn read_provider(&self) -> Result<impl Provider, ChainError> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Connectivity(format!("invalid rpc url: {e}")))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    /// Estimate gas for `liquidate(user)`. A revert here is returned as a typed error.
    async fn estimate_liquidation_gas(&self, user: Address) -> Result<u64, ChainError> {
        let provider = self.read_provider()?;
        let engine = IPerpEngine::new(self.contract, &provider);

        match engine.liquidate(user).from(self.address).estimate_gas().await {
            Ok(estimate) => Ok(((estimate as f64) * self.gas_limit_multiplier) as u64),
            Err(e) => {
                let reverted = e.as_revert_data().is_some();
                match ChainError::from_contract_error(e) {
                    ChainError::Rpc(message) if !reverted => {
                        warn!(
                            user = %user,
                            error = %message,
                            fallback = DEFAULT_LIQUIDATION_GAS_LIMIT,
                            "Gas estimation failed, using fallback limit"
                        );
                        Ok(DEFAULT_LIQUIDATION_GAS_LIMIT)
                    }
                    other => Err(other),
                }
            }
        }
    }

    async fn send_liquidation(
        &self,
        user: Address,
        timeout: Duration,
    ) -> Result<LiquidationReceipt, ChainError> {
        let total_start = Instant::now();

        let gas_limit = self.estimate_liquidation_gas(user).await?;
        let gas_params = self.gas_strategy.fetch_params(&self.rpc_url).await?;
        let nonce = self.nonce_manager.next();

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(self.contract)
            .with_input(encode_liquidate(user))
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_chain_id(self.chain_id);
        self.gas_strategy.apply_gas(&mut tx, &gas_params);

        info!(
            user = %user,
            nonce = nonce,
            gas_limit = gas_limit,
            gas_price_gwei = gas_params.effective_gas_price() / 1_000_000_000,
            gas_strategy = self.gas_strategy.strategy_name(),
            "Sending liquidation"
        );

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Connectivity(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(url);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(ChainError::from_transport_error)?;
        let tx_hash: B256 = *pending.tx_hash();
        info!(tx_hash = %tx_hash, "Liquidation submitted, waiting for confirmation");

        let receipt = match tokio::time::timeout(timeout, pending.get_receipt()).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => return Err(ChainError::Rpc(e.to_string())),
            Err(_) => return Err(ChainError::Timeout(timeout)),
        };

        let success = receipt.status();
        let reward = if success {
            find_liquidation_reward(receipt.inner.logs(), user)
        } else {
            None
        };

        info!(
            tx_hash = %tx_hash,
            success = success,
            block = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used,
            total_ms = total_start.elapsed().as_millis(),
            "Liquidation confirmed"
        );

        Ok(LiquidationReceipt {
            tx_hash,
            success,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used as u64,
            reward,
        })
    }
}

#[async_trait]
impl LiquidationSubmitter for TransactionSender {
    async fn fee_estimate(&self) -> Result<u128, ChainError> {
        let params = self.gas_strategy.fetch_params(&self.rpc_url).await?;
        Ok(params.effective_gas_price())
    }

    async fn submit_liquidation(
        &self,
        user: Address,
        timeout: Duration,
    ) -> Result<LiquidationReceipt, ChainError> {
        let result = self.send_liquidation(user, timeout).await;

        if let Err(e) = &result {
            if needs_nonce_resync(e) {
                self.sync_nonce().await;
            }
        }

        result
    }
}

/// Whether a failed submission may have left the cached nonce out of step.
///
/// A timed-out tx is still pending and holds its nonce.
fn needs_nonce_resync(err: &ChainError) -> bool {
    !matches!(err, ChainError::Timeout(_))
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("contract", &self.contract)
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_resync_decision() {
        assert!(!needs_nonce_resync(&ChainError::Timeout(Duration::from_secs(120))));
        assert!(needs_nonce_resync(&ChainError::Rpc(
            "replacement transaction underpriced".into()
        )));
        assert!(needs_nonce_resync(&ChainError::InsufficientFunds(
            "insufficient funds for gas".into()
        )));
        assert!(needs_nonce_resync(&ChainError::NotLiquidatable(
            "Position not liquidatable".into()
        )));
    }

    #[test]
    fn test_nonce_manager() {
        let manager = NonceManager::new(10);

        assert_eq!(manager.current(), 10);
        assert_eq!(manager.next(), 10);
        assert_eq!(manager.next(), 11);
        assert_eq!(manager.current(), 12);

        manager.reset(5);
        assert_eq!(manager.current(), 5);
    }

    #[tokio::test]
    async fn test_invalid_private_key() {
        let err = TransactionSenderBuilder::new("http://127.0.0.1:8545", 31337, Address::ZERO)
            .build("not-a-key")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid private key"));
    }

    #[tokio::test]
    #[ignore] // Requires a local node (anvil)
    async fn test_sender_creation() {
        // Anvil's first dev key
        let private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let sender = TransactionSenderBuilder::new("http://127.0.0.1:8545", 31337, Address::ZERO)
            .build(private_key)
            .await
            .unwrap();

        assert_eq!(
            format!("{:?}", sender.address).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(sender.gas_strategy_name(), "Legacy");
    }
}
