//! Durable key-value state for the tracked-address set and backfill cursor.
//!
//! The store is optional. [`NoopStore`] stands in when no durable backend is
//! configured, so callers never branch on its presence; `is_durable()` only
//! decides whether live event listeners are worth running.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::info;

/// Errors from the durable store. Callers log these and continue in memory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed value at {key}: {message}")]
    Malformed { key: String, message: String },
}

/// Key-value capability with `get`/`set` semantics.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write all pairs as one unit: either every key is updated or none is.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError>;

    /// Whether writes survive this process.
    fn is_durable(&self) -> bool;
}

/// Store used when no backend is configured. Reads are empty and writes vanish.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl StateStore for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set_many(&self, _entries: &[(String, String)]) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// In-process store. Reports itself durable so it can stand in for Redis in tests
/// and in single-process setups that share one instance across invocations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Redis-backed store over a multiplexed tokio connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        info!("Redis state store connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.set(key, value).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Key layout for one engine deployment: `liquidator:{chain_id}:{contract}:{field}`.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(chain_id: u64, contract: alloy::primitives::Address) -> Self {
        Self {
            prefix: format!("liquidator:{}:0x{}", chain_id, hex::encode(contract.as_slice())),
        }
    }

    pub fn tracked_positions(&self) -> String {
        format!("{}:tracked_positions", self.prefix)
    }

    pub fn last_backfill_time(&self) -> String {
        format!("{}:last_backfill_time", self.prefix)
    }

    pub fn last_backfill_block(&self) -> String {
        format!("{}:last_backfill_block", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[tokio::test]
    async fn test_noop_store_forgets() {
        let store = NoopStore;
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.is_durable());
    }

    #[tokio::test]
    async fn test_memory_store_set_many() {
        let store = MemoryStore::new();
        store
            .set_many(&[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 2);
        assert!(store.is_durable());
    }

    #[test]
    fn test_keys_are_namespaced_lowercase() {
        let contract: Address = "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap();
        let keys = StoreKeys::new(31337, contract);

        assert_eq!(
            keys.tracked_positions(),
            "liquidator:31337:0x5fbdb2315678afecb367f032d93f642f64180aa3:tracked_positions"
        );
        assert!(keys.last_backfill_block().ends_with(":last_backfill_block"));
        assert!(keys.last_backfill_time().ends_with(":last_backfill_time"));
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis
    async fn test_redis_store_roundtrip() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        store
            .set_many(&[("liquidator:test:x".to_string(), "42".to_string())])
            .await
            .unwrap();
        assert_eq!(
            store.get("liquidator:test:x").await.unwrap().as_deref(),
            Some("42")
        );
    }
}
