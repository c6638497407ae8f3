//! Eligibility checks over the tracked set and dispatch to the liquidation handler.
//!
//! One check operation, two drivers: [`MonitorService::start`] runs it on an
//! interval, [`MonitorService::execute_check`] runs it once. The interval
//! driver reconciles from event history before each check whenever no live
//! subscription is keeping the tracked set current.

use alloy::primitives::Address;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use liquidator_chain::{ChainError, PositionReader};

use crate::config::MonitorConfig;
use crate::liquidator::{LiquidationHandler, LiquidationOutcome};
use crate::position_tracker::PositionTracker;

/// What one read pass learned about an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eligibility {
    /// Engine reports no position.
    Gone,
    Healthy,
    Liquidatable,
}

/// Summary of one check.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Addresses read
    pub checked: usize,
    /// Addresses dropped because their position no longer exists
    pub removed: usize,
    pub eligible: Vec<Address>,
    pub read_failures: usize,
    pub outcomes: Vec<LiquidationOutcome>,
    /// Remaining submissions skipped after the signer ran out of funds
    pub aborted: bool,
}

impl CheckReport {
    pub fn liquidated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MonitorService {
    tracker: Arc<PositionTracker>,
    reader: Arc<dyn PositionReader>,
    handler: Arc<dyn LiquidationHandler>,
    interval: Duration,
    batch_size: usize,
    liquidation_delay: Duration,
    /// Backfill lookback used by the interval driver; `None` disables reconciliation
    reconcile_range: Option<u64>,
    running: Mutex<Option<LoopHandle>>,
}

impl MonitorService {
    pub fn new(
        tracker: Arc<PositionTracker>,
        reader: Arc<dyn PositionReader>,
        handler: Arc<dyn LiquidationHandler>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            tracker,
            reader,
            handler,
            interval: config.interval(),
            batch_size: config.batch_size.max(1),
            liquidation_delay: config.liquidation_delay(),
            reconcile_range: None,
            running: Mutex::new(None),
        }
    }

    /// Reconcile with `backfill_positions(block_range, false)` before each interval check.
    pub fn with_reconcile(mut self, block_range: u64) -> Self {
        self.reconcile_range = Some(block_range);
        self
    }

    /// Run one check over every tracked address.
    pub async fn execute_check(&self) -> CheckReport {
        let addresses = self.tracker.get_active_positions();
        if addresses.is_empty() {
            debug!("No tracked positions, skipping check");
            return CheckReport::default();
        }

        let start = Instant::now();
        let mut report = CheckReport {
            checked: addresses.len(),
            ..Default::default()
        };

        for (index, batch) in addresses.chunks(self.batch_size).enumerate() {
            let results = join_all(batch.iter().map(|user| self.evaluate(*user))).await;

            let mut removed = 0;
            for (user, result) in batch.iter().zip(results) {
                match result {
                    Ok(Eligibility::Gone) => {
                        if self.tracker.remove_position(*user) {
                            debug!(user = %user, "Position closed on-chain, untracked");
                            removed += 1;
                        }
                    }
                    Ok(Eligibility::Liquidatable) => report.eligible.push(*user),
                    Ok(Eligibility::Healthy) => {}
                    Err(e) => {
                        warn!(user = %user, error = %e, "Failed to read position");
                        report.read_failures += 1;
                    }
                }
            }

            if removed > 0 {
                self.tracker.sync_to_kv().await;
                report.removed += removed;
            }

            debug!(batch = index, size = batch.len(), removed = removed, "Batch checked");
        }

        if !report.eligible.is_empty() {
            info!(count = report.eligible.len(), "Liquidatable positions found");
        }

        let eligible = report.eligible.clone();
        for (index, user) in eligible.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.liquidation_delay).await;
            }

            let outcome = self.handler.liquidate(*user).await;
            let out_of_funds = outcome.is_insufficient_funds();
            report.outcomes.push(outcome);

            if out_of_funds {
                error!(
                    skipped = eligible.len() - index - 1,
                    "Liquidator out of funds, skipping remaining liquidations this pass"
                );
                report.aborted = true;
                break;
            }
        }

        info!(
            checked = report.checked,
            removed = report.removed,
            eligible = report.eligible.len(),
            liquidated = report.liquidated(),
            read_failures = report.read_failures,
            elapsed_ms = start.elapsed().as_millis(),
            "Check complete"
        );

        report
    }

    /// Incremental backfill, skipped while live events are flowing.
    async fn reconcile(&self) {
        let Some(range) = self.reconcile_range else {
            return;
        };
        if self.tracker.is_subscribed() {
            return;
        }
        match self.tracker.backfill_positions(range, false).await {
            Ok(report) if report.added > 0 => {
                info!(added = report.added, to_block = report.to_block, "New positions discovered");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Reconciliation failed, checking known positions"),
        }
    }

    async fn evaluate(&self, user: Address) -> Result<Eligibility, ChainError> {
        let position = self.reader.position(user).await?;
        if !position.exists {
            return Ok(Eligibility::Gone);
        }
        if self.reader.is_liquidatable(user).await? {
            Ok(Eligibility::Liquidatable)
        } else {
            Ok(Eligibility::Healthy)
        }
    }

    /// Check immediately, then every interval until [`stop`](Self::stop).
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.running.lock();
        if guard.is_some() {
            warn!("Monitor already running");
            return;
        }

        let cancel = CancellationToken::new();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { monitor.run_loop(token).await });
        *guard = Some(LoopHandle { cancel, task });

        info!(
            interval_ms = self.interval.as_millis(),
            batch_size = self.batch_size,
            "Monitor started"
        );
    }

    /// Stop the interval loop. An in-flight check runs to completion first.
    pub async fn stop(&self) {
        let handle = self.running.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
            info!("Monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.reconcile().await;
                    self.execute_check().await;
                }
            }
        }
    }
}
