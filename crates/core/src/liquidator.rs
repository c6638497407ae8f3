//! Liquidation executor: gas ceiling, submission, confirmation and outcome classification.

use alloy::primitives::{utils::format_ether, Address, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use liquidator_chain::gas::{gwei_to_wei, GWEI};
use liquidator_chain::{ChainError, LiquidationSubmitter};

use crate::position_tracker::PositionTracker;

/// Why a liquidation attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network fee above the configured ceiling; nothing was submitted.
    GasCeilingExceeded,
    /// Position gone or no longer eligible; the address was dropped.
    StalePosition,
    /// Signer cannot pay for gas.
    InsufficientFunds,
    /// Transaction mined with a failed status.
    Reverted,
    /// Receipt did not arrive in time.
    Timeout,
    /// Any other RPC or contract failure.
    Rpc,
}

impl FailureKind {
    /// Whether a later attempt on the same address may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::StalePosition)
    }
}

/// Result of one liquidation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub success: bool,
    pub user: Address,
    pub tx_hash: Option<B256>,
    /// Reward in wei as emitted by `PositionLiquidated`
    pub reward: Option<U256>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl LiquidationOutcome {
    pub fn succeeded(user: Address, tx_hash: B256, reward: Option<U256>) -> Self {
        Self {
            success: true,
            user,
            tx_hash: Some(tx_hash),
            reward,
            error: None,
            failure: None,
        }
    }

    pub fn failed(
        user: Address,
        kind: FailureKind,
        tx_hash: Option<B256>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            user,
            tx_hash,
            reward: None,
            error: Some(error.into()),
            failure: Some(kind),
        }
    }

    /// Classify a chain error.
    pub fn from_error(user: Address, err: &ChainError) -> Self {
        let kind = match err {
            ChainError::NotLiquidatable(_) => FailureKind::StalePosition,
            ChainError::InsufficientFunds(_) => FailureKind::InsufficientFunds,
            ChainError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Rpc,
        };
        Self::failed(user, kind, None, err.to_string())
    }

    /// Reward in ether.
    pub fn reward_ether(&self) -> Option<f64> {
        self.reward
            .and_then(|wei| format_ether(wei).parse::<f64>().ok())
    }

    pub fn is_insufficient_funds(&self) -> bool {
        self.failure == Some(FailureKind::InsufficientFunds)
    }
}

/// Callback the monitor dispatches eligible addresses to.
#[async_trait]
pub trait LiquidationHandler: Send + Sync {
    async fn liquidate(&self, user: Address) -> LiquidationOutcome;
}

/// Submits liquidations and keeps the tracker in step with terminal outcomes.
pub struct LiquidationService {
    submitter: Arc<dyn LiquidationSubmitter>,
    tracker: Arc<PositionTracker>,
    /// Fee ceiling in wei
    max_gas_price: Option<u128>,
    confirmation_timeout: Duration,
}

impl LiquidationService {
    pub fn new(submitter: Arc<dyn LiquidationSubmitter>, tracker: Arc<PositionTracker>) -> Self {
        Self {
            submitter,
            tracker,
            max_gas_price: None,
            confirmation_timeout: Duration::from_secs(120),
        }
    }

    /// Skip submissions while the network fee is above `gwei`.
    pub fn with_max_gas_price_gwei(mut self, gwei: Option<f64>) -> Self {
        self.max_gas_price = gwei.map(gwei_to_wei);
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Check the fee against the ceiling. `Some` means the attempt ends here.
    async fn check_gas_ceiling(&self, user: Address) -> Option<LiquidationOutcome> {
        let ceiling = self.max_gas_price?;

        let fee = match self.submitter.fee_estimate().await {
            Ok(fee) => fee,
            Err(e) => {
                warn!(user = %user, error = %e, "Fee estimate unavailable, skipping liquidation");
                return Some(LiquidationOutcome::failed(
                    user,
                    FailureKind::Rpc,
                    None,
                    format!("fee estimate unavailable: {e}"),
                ));
            }
        };

        if fee > ceiling {
            warn!(
                user = %user,
                fee_gwei = fee / GWEI,
                ceiling_gwei = ceiling / GWEI,
                "Gas price above ceiling, skipping liquidation"
            );
            return Some(LiquidationOutcome::failed(
                user,
                FailureKind::GasCeilingExceeded,
                None,
                format!(
                    "gas price {} gwei exceeds ceiling {} gwei",
                    fee / GWEI,
                    ceiling / GWEI
                ),
            ));
        }

        None
    }
}

#[async_trait]
impl LiquidationHandler for LiquidationService {
    #[instrument(skip_all, fields(user = %user))]
    async fn liquidate(&self, user: Address) -> LiquidationOutcome {
        if let Some(skipped) = self.check_gas_ceiling(user).await {
            return skipped;
        }

        let start = Instant::now();
        info!(user = %user, "Submitting liquidation");

        match self
            .submitter
            .submit_liquidation(user, self.confirmation_timeout)
            .await
        {
            Ok(receipt) if receipt.success => {
                let outcome = LiquidationOutcome::succeeded(user, receipt.tx_hash, receipt.reward);
                info!(
                    user = %user,
                    tx_hash = %receipt.tx_hash,
                    reward_eth = outcome.reward_ether().unwrap_or_default(),
                    gas_used = receipt.gas_used,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Liquidation succeeded"
                );
                if self.tracker.remove_position(user) {
                    self.tracker.sync_to_kv().await;
                }
                outcome
            }
            Ok(receipt) => {
                warn!(user = %user, tx_hash = %receipt.tx_hash, "Liquidation transaction reverted");
                LiquidationOutcome::failed(
                    user,
                    FailureKind::Reverted,
                    Some(receipt.tx_hash),
                    "Transaction reverted",
                )
            }
            Err(e) => {
                let outcome = LiquidationOutcome::from_error(user, &e);
                match outcome.failure {
                    Some(FailureKind::StalePosition) => {
                        info!(user = %user, reason = %e, "Position no longer liquidatable, untracking");
                        if self.tracker.remove_position(user) {
                            self.tracker.sync_to_kv().await;
                        }
                    }
                    Some(FailureKind::InsufficientFunds) => {
                        error!(user = %user, error = %e, "Liquidator wallet cannot pay for gas");
                    }
                    Some(FailureKind::Timeout) => {
                        warn!(user = %user, error = %e, "Liquidation not confirmed in time, will retry");
                    }
                    _ => {
                        warn!(user = %user, error = %e, "Liquidation failed");
                    }
                }
                outcome
            }
        }
    }
}
