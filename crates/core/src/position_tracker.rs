//! Tracked-address set for accounts believed to hold an open position.
//!
//! The set is rebuilt from event history (backfill), kept current by live
//! events when nothing durable backs it, and persisted after each mutation
//! batch. It over-approximates: stale entries are dropped on the next check
//! when the engine reports no position.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liquidator_chain::{ChainError, EventKind, EventSource, PositionEvent};

use crate::store::{StateStore, StoreError, StoreKeys};

/// Back-off before re-subscribing after the live stream ends or fails.
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Highest block folded into the tracked set, and when that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillCursor {
    pub block: u64,
    pub at: Option<DateTime<Utc>>,
}

/// Result of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Distinct accounts with an `Opened` event in the window
    pub opened: usize,
    /// Distinct accounts with a `Closed` or `Liquidated` event in the window
    pub ended: usize,
    /// Accounts newly inserted into the set
    pub added: usize,
    /// Window was empty (`from > current`); nothing scanned
    pub skipped: bool,
    /// Set and cursor reached the store
    pub persisted: bool,
}

/// Snapshot for logging.
#[derive(Debug, Clone, Copy)]
pub struct TrackerStats {
    pub tracked: usize,
    pub cursor_block: Option<u64>,
    pub last_backfill: Option<DateTime<Utc>>,
    /// A live subscription is currently delivering events
    pub listening: bool,
}

struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the tracked-address set.
pub struct PositionTracker {
    tracked: DashSet<Address>,
    cursor: RwLock<Option<BackfillCursor>>,
    events: Arc<dyn EventSource>,
    store: Arc<dyn StateStore>,
    keys: StoreKeys,
    log_chunk_size: u64,
    listener: Mutex<Option<ListenerHandle>>,
    subscribed: AtomicBool,
}

impl PositionTracker {
    pub fn new(
        events: Arc<dyn EventSource>,
        store: Arc<dyn StateStore>,
        keys: StoreKeys,
        log_chunk_size: u64,
    ) -> Self {
        Self {
            tracked: DashSet::new(),
            cursor: RwLock::new(None),
            events,
            store,
            keys,
            log_chunk_size: log_chunk_size.max(1),
            listener: Mutex::new(None),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Whether the backing store survives this process.
    pub fn store_is_durable(&self) -> bool {
        self.store.is_durable()
    }

    /// Restore the set and cursor from the store. Returns the number of addresses loaded.
    ///
    /// Missing keys mean a first run. Store failures are logged and leave the
    /// tracker empty.
    pub async fn load_from_kv(&self) -> usize {
        match self.read_persisted().await {
            Ok((addresses, cursor)) => {
                let loaded = addresses
                    .into_iter()
                    .filter(|a| self.tracked.insert(*a))
                    .count();
                if let Some(cursor) = cursor {
                    *self.cursor.write() = Some(cursor);
                }
                info!(
                    loaded = loaded,
                    cursor = ?cursor.map(|c| c.block),
                    "Restored tracked positions from store"
                );
                loaded
            }
            Err(e) => {
                warn!(error = %e, "Failed to load tracked positions; starting empty");
                0
            }
        }
    }

    async fn read_persisted(
        &self,
    ) -> Result<(Vec<Address>, Option<BackfillCursor>), StoreError> {
        let key = self.keys.tracked_positions();
        let addresses = match self.store.get(&key).await? {
            Some(raw) => {
                let entries: Vec<String> =
                    serde_json::from_str(&raw).map_err(|e| StoreError::Malformed {
                        key: key.clone(),
                        message: e.to_string(),
                    })?;
                entries
                    .iter()
                    .filter_map(|entry| match entry.parse::<Address>() {
                        Ok(address) => Some(address),
                        Err(e) => {
                            warn!(entry = %entry, error = %e, "Skipping unparseable tracked address");
                            None
                        }
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let block_key = self.keys.last_backfill_block();
        let block = match self.store.get(&block_key).await? {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| StoreError::Malformed {
                key: block_key.clone(),
                message: e.to_string(),
            })?),
            None => None,
        };

        let at = match self.store.get(&self.keys.last_backfill_time()).await? {
            Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| warn!(error = %e, "Ignoring malformed backfill timestamp"))
                .ok(),
            None => None,
        };

        Ok((addresses, block.map(|block| BackfillCursor { block, at })))
    }

    /// Fold event history into the set.
    ///
    /// The window is `[cursor, head]` when a cursor exists and `force_full` is
    /// false, otherwise `[head - block_range, head]`. Accounts opened in the
    /// window and not closed or liquidated in it are added. Nothing is removed.
    /// The in-memory cursor moves to `head` only after set and cursor are
    /// written together.
    pub async fn backfill_positions(
        &self,
        block_range: u64,
        force_full: bool,
    ) -> Result<BackfillReport, ChainError> {
        let current = self.events.block_number().await?;
        let cursor = *self.cursor.read();

        let from = match cursor {
            Some(c) if !force_full => c.block,
            _ => current.saturating_sub(block_range),
        };

        if from > current {
            info!(from = from, current = current, "Backfill window empty, nothing to scan");
            return Ok(BackfillReport {
                from_block: from,
                to_block: current,
                skipped: true,
                ..Default::default()
            });
        }

        info!(
            from = from,
            to = current,
            incremental = cursor.is_some() && !force_full,
            "Backfilling positions"
        );

        let mut opened: HashSet<Address> = HashSet::new();
        let mut ended: HashSet<Address> = HashSet::new();

        let mut start = from;
        loop {
            let end = start
                .saturating_add(self.log_chunk_size - 1)
                .min(current);

            let (opens, closes, liquidations) = tokio::try_join!(
                self.events.query_events(EventKind::Opened, start, end),
                self.events.query_events(EventKind::Closed, start, end),
                self.events.query_events(EventKind::Liquidated, start, end),
            )?;

            opened.extend(opens.iter().map(PositionEvent::user));
            ended.extend(closes.iter().chain(liquidations.iter()).map(PositionEvent::user));

            debug!(
                from = start,
                to = end,
                opened = opens.len(),
                closed = closes.len(),
                liquidated = liquidations.len(),
                "Scanned log chunk"
            );

            if end >= current {
                break;
            }
            start = end + 1;
        }

        let added = opened
            .difference(&ended)
            .filter(|user| self.tracked.insert(**user))
            .count();

        let next_cursor = BackfillCursor {
            block: current,
            at: Some(Utc::now()),
        };
        let persisted = match self.persist_with_cursor(&next_cursor).await {
            Ok(()) => {
                *self.cursor.write() = Some(next_cursor);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist backfill; cursor not advanced");
                false
            }
        };

        info!(
            from = from,
            to = current,
            opened = opened.len(),
            ended = ended.len(),
            added = added,
            tracked = self.tracked.len(),
            "Backfill complete"
        );

        Ok(BackfillReport {
            from_block: from,
            to_block: current,
            opened: opened.len(),
            ended: ended.len(),
            added,
            skipped: false,
            persisted,
        })
    }

    async fn persist_with_cursor(&self, cursor: &BackfillCursor) -> Result<(), StoreError> {
        let mut entries = vec![
            (self.keys.tracked_positions(), self.serialize_set()?),
            (self.keys.last_backfill_block(), cursor.block.to_string()),
        ];
        if let Some(at) = cursor.at {
            entries.push((self.keys.last_backfill_time(), at.to_rfc3339()));
        }
        self.store.set_many(&entries).await
    }

    fn serialize_set(&self) -> Result<String, StoreError> {
        let mut addresses: Vec<String> = self
            .tracked
            .iter()
            .map(|a| format!("0x{}", hex::encode(a.as_slice())))
            .collect();
        addresses.sort();
        serde_json::to_string(&addresses).map_err(|e| StoreError::Malformed {
            key: self.keys.tracked_positions(),
            message: e.to_string(),
        })
    }

    /// Flush the current set. Failures are logged; the in-memory set stays authoritative.
    pub async fn sync_to_kv(&self) {
        let result = match self.serialize_set() {
            Ok(json) => self.store.set(&self.keys.tracked_positions(), &json).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(tracked = self.tracked.len(), "Tracked positions synced"),
            Err(e) => warn!(error = %e, "Failed to sync tracked positions"),
        }
    }

    /// Track `user`. Returns false if already tracked.
    pub fn add_position(&self, user: Address) -> bool {
        let added = self.tracked.insert(user);
        if added {
            debug!(user = %user, "Tracking position");
        }
        added
    }

    /// Stop tracking `user`. Returns false if it was not tracked.
    pub fn remove_position(&self, user: Address) -> bool {
        let removed = self.tracked.remove(&user).is_some();
        if removed {
            debug!(user = %user, "Untracked position");
        }
        removed
    }

    pub fn is_tracked(&self, user: &Address) -> bool {
        self.tracked.contains(user)
    }

    /// Snapshot of the set. Order is not significant.
    pub fn get_active_positions(&self) -> Vec<Address> {
        self.tracked.iter().map(|a| *a).collect()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn cursor(&self) -> Option<BackfillCursor> {
        *self.cursor.read()
    }

    /// Apply a live lifecycle event. Returns true if the set changed.
    pub fn apply_event(&self, event: &PositionEvent) -> bool {
        if event.is_terminal() {
            self.remove_position(event.user())
        } else {
            self.add_position(event.user())
        }
    }

    pub fn stats(&self) -> TrackerStats {
        let cursor = self.cursor();
        TrackerStats {
            tracked: self.tracked.len(),
            cursor_block: cursor.map(|c| c.block),
            last_backfill: cursor.and_then(|c| c.at),
            listening: self.is_subscribed(),
        }
    }

    /// Whether live events are currently keeping the set current.
    ///
    /// False while the listener is backing off or has given up.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Follow live lifecycle events until [`stop_event_listeners`](Self::stop_event_listeners).
    ///
    /// Only runs when the store is not durable; with a durable store each
    /// invocation reconciles through backfill instead. Returns whether a
    /// listener is running.
    pub fn start_event_listeners(self: &Arc<Self>) -> bool {
        if self.store.is_durable() {
            info!("Durable store configured, live event listeners not started");
            return false;
        }

        let mut guard = self.listener.lock();
        if guard.is_some() {
            return true;
        }

        let cancel = CancellationToken::new();
        let tracker = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { tracker.run_listener(token).await });
        *guard = Some(ListenerHandle { cancel, task });

        info!("Live event listeners started");
        true
    }

    /// Cancel the listener task and wait for it to finish.
    pub async fn stop_event_listeners(&self) {
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(error = %e, "Event listener task ended abnormally");
            }
            self.subscribed.store(false, Ordering::SeqCst);
            info!("Live event listeners stopped");
        }
    }

    async fn run_listener(&self, cancel: CancellationToken) {
        self.listen(&cancel).await;
        self.subscribed.store(false, Ordering::SeqCst);
    }

    async fn listen(&self, cancel: &CancellationToken) {
        loop {
            let subscription = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.events.subscribe() => result,
            };

            match subscription {
                Ok(mut stream) => {
                    info!("Subscribed to position events");
                    self.subscribed.store(true, Ordering::SeqCst);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            next = stream.next() => match next {
                                Some(event) => {
                                    if self.apply_event(&event) {
                                        info!(
                                            event = event.kind().name(),
                                            user = %event.user(),
                                            block = event.block_number(),
                                            tracked = self.tracked.len(),
                                            "Tracked set updated from live event"
                                        );
                                        self.sync_to_kv().await;
                                    }
                                }
                                None => {
                                    warn!("Position event stream ended");
                                    self.subscribed.store(false, Ordering::SeqCst);
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(ChainError::SubscriptionUnavailable(reason)) => {
                    warn!(reason = %reason, "Live events unavailable, relying on backfill");
                    return;
                }
                Err(e) => warn!(error = %e, "Failed to subscribe to position events"),
            }

            debug!(delay_secs = LISTENER_RETRY_DELAY.as_secs(), "Re-subscribing after back-off");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(LISTENER_RETRY_DELAY) => {}
            }
        }
    }
}
