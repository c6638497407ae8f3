//! Orchestration for the liquidation bot.
//!
//! Wires the chain layer, store, tracker, monitor and liquidation service, and
//! drives them in one of two lifetimes:
//! - persistent: backfill once, follow live events, check on an interval until
//!   shutdown, reconciling before each check while no live subscription is up
//! - stateless: restore from the store, reconcile incrementally, check once

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use liquidator_chain::gas::create_gas_strategy;
use liquidator_chain::{ChainError, ProviderManager, TransactionSenderBuilder};

use crate::config::{BackfillConfig, BotConfig, ChainSettings};
use crate::liquidator::LiquidationService;
use crate::monitor::{CheckReport, MonitorService};
use crate::position_tracker::{BackfillReport, PositionTracker};
use crate::store::{NoopStore, RedisStore, StateStore, StoreKeys};

pub struct Orchestrator {
    tracker: Arc<PositionTracker>,
    monitor: Arc<MonitorService>,
    backfill: BackfillConfig,
}

impl Orchestrator {
    pub fn new(
        tracker: Arc<PositionTracker>,
        monitor: Arc<MonitorService>,
        backfill: BackfillConfig,
    ) -> Self {
        Self {
            tracker,
            monitor,
            backfill,
        }
    }

    /// Connect to the chain and store and assemble every component.
    ///
    /// Fails if the RPC endpoint is unreachable or the signer cannot be set up.
    /// An unreachable store is logged and replaced by an in-memory one.
    pub async fn connect(config: &BotConfig, settings: &ChainSettings) -> Result<Self> {
        let provider = Arc::new(
            ProviderManager::new(
                &settings.rpc_url,
                settings.ws_url.as_deref(),
                settings.contract,
            )
            .await
            .context("RPC endpoint unreachable")?,
        );

        let node_chain_id = provider.chain_id().await.context("Failed to read chain id")?;
        if node_chain_id != settings.chain_id {
            warn!(
                configured = settings.chain_id,
                node = node_chain_id,
                "Configured chain id differs from the node's"
            );
        }

        let store: Arc<dyn StateStore> = match settings.redis_url.as_deref() {
            Some(url) => match RedisStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, state will not persist");
                    Arc::new(NoopStore)
                }
            },
            None => {
                info!("No REDIS_URL configured, running with in-memory state");
                Arc::new(NoopStore)
            }
        };

        let liquidation = &config.liquidation;
        let sender = TransactionSenderBuilder::new(
            settings.rpc_url.clone(),
            settings.chain_id,
            settings.contract,
        )
        .gas_strategy(create_gas_strategy(
            &liquidation.gas_pricing,
            liquidation.priority_fee_gwei,
            liquidation.base_fee_multiplier,
        ))
        .gas_limit_multiplier(liquidation.gas_limit_multiplier)
        .build(&settings.private_key)
        .await
        .context("Failed to initialize transaction sender")?;

        match sender.balance().await {
            Ok(balance) => info!(
                address = %sender.address,
                balance_eth = %alloy::primitives::utils::format_ether(balance),
                "Liquidator wallet"
            ),
            Err(e) => warn!(error = %e, "Could not read liquidator balance"),
        }

        let tracker = Arc::new(PositionTracker::new(
            provider.clone(),
            store,
            StoreKeys::new(settings.chain_id, settings.contract),
            config.backfill.log_chunk_size,
        ));

        let service = LiquidationService::new(Arc::new(sender), tracker.clone())
            .with_max_gas_price_gwei(liquidation.max_gas_price_gwei)
            .with_confirmation_timeout(liquidation.confirmation_timeout());

        let monitor = Arc::new(
            MonitorService::new(tracker.clone(), provider, Arc::new(service), &config.monitor)
                .with_reconcile(config.backfill.block_range),
        );

        Ok(Self::new(tracker, monitor, config.backfill.clone()))
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    /// Persistent lifetime. Returns once `shutdown` resolves and every task has stopped.
    pub async fn run_until_shutdown<F>(&self, shutdown: F) -> Result<(), ChainError>
    where
        F: Future<Output = ()>,
    {
        self.tracker.load_from_kv().await;
        self.tracker
            .backfill_positions(self.backfill.block_range, false)
            .await?;

        self.tracker.start_event_listeners();
        self.monitor.start();

        let stats = self.tracker.stats();
        info!(
            tracked = stats.tracked,
            listening = stats.listening,
            "Liquidator running"
        );

        shutdown.await;
        info!("Shutdown requested");

        self.monitor.stop().await;
        self.tracker.stop_event_listeners().await;
        self.tracker.sync_to_kv().await;

        info!(tracked = self.tracker.len(), "Liquidator stopped");
        Ok(())
    }

    /// Stateless lifetime: restore, reconcile from the stored cursor, check once.
    ///
    /// A failed reconciliation is logged and the check runs over the restored set.
    pub async fn execute_check(&self) -> CheckReport {
        self.tracker.load_from_kv().await;

        if let Err(e) = self
            .tracker
            .backfill_positions(self.backfill.block_range, false)
            .await
        {
            error!(error = %e, "Backfill failed, checking restored positions only");
        }

        let report = self.monitor.execute_check().await;
        self.tracker.sync_to_kv().await;
        report
    }

    /// Explicit reconciliation. `force_full` ignores the stored cursor.
    pub async fn backfill_positions(&self, force_full: bool) -> Result<BackfillReport, ChainError> {
        self.tracker.load_from_kv().await;
        self.tracker
            .backfill_positions(self.backfill.block_range, force_full)
            .await
    }
}
