//! In-memory doubles for the chain capabilities.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;

use liquidator_chain::{
    ChainError, EventKind, EventSource, EventStream, LiquidationReceipt, LiquidationSubmitter,
    PositionEvent, PositionReader, PositionView,
};

use crate::liquidator::{LiquidationHandler, LiquidationOutcome};
use crate::store::{StateStore, StoreError};

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn opened(user: Address, block: u64) -> PositionEvent {
    PositionEvent::Opened {
        user,
        block_number: block,
        tx_hash: B256::ZERO,
    }
}

pub fn closed(user: Address, block: u64) -> PositionEvent {
    PositionEvent::Closed {
        user,
        block_number: block,
        tx_hash: B256::ZERO,
    }
}

pub fn liquidated(user: Address, block: u64) -> PositionEvent {
    PositionEvent::Liquidated {
        user,
        liquidator: Address::ZERO,
        reward: U256::ZERO,
        block_number: block,
        tx_hash: B256::ZERO,
    }
}

/// Event history with a fixed head block and an optional live feed.
pub struct MockEventSource {
    head: AtomicU64,
    history: Mutex<Vec<PositionEvent>>,
    queries: Mutex<Vec<(EventKind, u64, u64)>>,
    fail_queries: AtomicBool,
    live: Mutex<Option<mpsc::UnboundedReceiver<PositionEvent>>>,
}

impl MockEventSource {
    pub fn new(head: u64, history: Vec<PositionEvent>) -> Self {
        Self {
            head: AtomicU64::new(head),
            history: Mutex::new(history),
            queries: Mutex::new(Vec::new()),
            fail_queries: AtomicBool::new(false),
            live: Mutex::new(None),
        }
    }

    /// Attach a live feed; the returned sender pushes events to the subscriber.
    pub fn with_live_feed(self) -> (Self, mpsc::UnboundedSender<PositionEvent>) {
        let (tx, rx) = mpsc::unbounded();
        *self.live.lock() = Some(rx);
        (self, tx)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push(&self, event: PositionEvent) {
        self.history.lock().push(event);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<(EventKind, u64, u64)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PositionEvent>, ChainError> {
        self.queries.lock().push((kind, from_block, to_block));
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("log query failed".to_string()));
        }
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .filter(|e| (from_block..=to_block).contains(&e.block_number()))
            .cloned()
            .collect())
    }

    async fn subscribe(&self) -> Result<EventStream, ChainError> {
        match self.live.lock().take() {
            Some(rx) => Ok(Box::pin(rx)),
            None => Err(ChainError::Connectivity("no live feed".to_string())),
        }
    }
}

/// Contract reads keyed by address. Unknown addresses have no position.
#[derive(Default)]
pub struct MockReader {
    open: Mutex<HashSet<Address>>,
    liquidatable: Mutex<HashSet<Address>>,
    failing: Mutex<HashSet<Address>>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Concurrency level seen by each `position` read as it started
    starts: Mutex<Vec<usize>>,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, user: Address) {
        self.open.lock().insert(user);
    }

    pub fn open_liquidatable(&self, user: Address) {
        self.open(user);
        self.liquidatable.lock().insert(user);
    }

    pub fn fail(&self, user: Address) {
        self.failing.lock().insert(user);
    }

    /// Total `position` + `is_liquidatable` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `position` reads observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sizes of the concurrent `position` read groups, in start order.
    ///
    /// A group begins whenever a read starts with nothing else in flight.
    pub fn read_batches(&self) -> Vec<usize> {
        let mut batches: Vec<usize> = Vec::new();
        for level in self.starts.lock().iter().copied() {
            match batches.last_mut() {
                Some(size) if level > 1 => *size = (*size).max(level),
                _ => batches.push(level),
            }
        }
        batches
    }
}

#[async_trait]
impl PositionReader for MockReader {
    async fn position(&self, user: Address) -> Result<PositionView, ChainError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.starts.lock().push(now);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().contains(&user) {
            return Err(ChainError::Rpc("read failed".to_string()));
        }
        if self.open.lock().contains(&user) {
            Ok(PositionView {
                exists: true,
                ..PositionView::closed()
            })
        } else {
            Ok(PositionView::closed())
        }
    }

    async fn is_liquidatable(&self, user: Address) -> Result<bool, ChainError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.liquidatable.lock().contains(&user))
    }
}

/// Scripted submission results per address.
pub enum Scripted {
    Mined { reward: Option<U256> },
    Reverted,
    Fails(fn() -> ChainError),
}

pub struct MockSubmitter {
    fee_wei: Option<u128>,
    scripts: Mutex<HashMap<Address, Scripted>>,
    submitted: Mutex<Vec<Address>>,
    fee_calls: AtomicUsize,
}

impl MockSubmitter {
    /// `fee_wei == None` makes the fee estimate fail.
    pub fn new(fee_wei: Option<u128>) -> Self {
        Self {
            fee_wei,
            scripts: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            fee_calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, user: Address, result: Scripted) {
        self.scripts.lock().insert(user, result);
    }

    pub fn submitted(&self) -> Vec<Address> {
        self.submitted.lock().clone()
    }

    pub fn fee_calls(&self) -> usize {
        self.fee_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiquidationSubmitter for MockSubmitter {
    async fn fee_estimate(&self) -> Result<u128, ChainError> {
        self.fee_calls.fetch_add(1, Ordering::SeqCst);
        self.fee_wei
            .ok_or_else(|| ChainError::Rpc("fee estimate unavailable".to_string()))
    }

    async fn submit_liquidation(
        &self,
        user: Address,
        _timeout: Duration,
    ) -> Result<LiquidationReceipt, ChainError> {
        self.submitted.lock().push(user);
        let tx_hash = B256::repeat_byte(0x7A);
        match self.scripts.lock().get(&user) {
            Some(Scripted::Mined { reward }) => Ok(LiquidationReceipt {
                tx_hash,
                success: true,
                block_number: Some(1),
                gas_used: 21_000,
                reward: *reward,
            }),
            Some(Scripted::Reverted) => Ok(LiquidationReceipt {
                tx_hash,
                success: false,
                block_number: Some(1),
                gas_used: 21_000,
                reward: None,
            }),
            Some(Scripted::Fails(make)) => Err(make()),
            None => Err(ChainError::Rpc("unscripted".to_string())),
        }
    }
}

/// Records every dispatched address and replies with a canned outcome.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(Address, tokio::time::Instant)>>,
    insufficient_funds: Mutex<HashSet<Address>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn out_of_funds_on(&self, user: Address) {
        self.insufficient_funds.lock().insert(user);
    }

    pub fn calls(&self) -> Vec<Address> {
        self.calls.lock().iter().map(|(a, _)| *a).collect()
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl LiquidationHandler for RecordingHandler {
    async fn liquidate(&self, user: Address) -> LiquidationOutcome {
        self.calls.lock().push((user, tokio::time::Instant::now()));
        if self.insufficient_funds.lock().contains(&user) {
            let err = ChainError::InsufficientFunds("balance 0".to_string());
            return LiquidationOutcome::from_error(user, &err);
        }
        LiquidationOutcome::succeeded(user, B256::repeat_byte(0x01), None)
    }
}

/// Store whose writes always fail.
pub struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Malformed {
            key: "*".to_string(),
            message: "unavailable".to_string(),
        })
    }

    async fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Malformed {
            key: key.to_string(),
            message: "unavailable".to_string(),
        })
    }

    async fn set_many(&self, _entries: &[(String, String)]) -> Result<(), StoreError> {
        Err(StoreError::Malformed {
            key: "*".to_string(),
            message: "unavailable".to_string(),
        })
    }

    fn is_durable(&self) -> bool {
        true
    }
}
