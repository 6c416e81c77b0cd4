//! Optional cache tier with per-entry TTL

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{StorageError, StorageResult};

/// Key/value cache consulted before the backing store
///
/// Cache failures are never fatal to callers; the registry logs them and
/// falls back to the store.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> StorageResult<()>;

    async fn del(&self, key: &str) -> StorageResult<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Process-local cache with lazy expiry
///
/// Uses the tokio clock, so tests can advance time with `tokio::time::pause`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored, expired or not
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for the key
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.get(key).map_or(false, |entry| entry.expires_at > Instant::now()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let now = Instant::now();
        let hit = {
            let entries = self
                .entries
                .read()
                .map_err(|_| StorageError::Cache("cache lock poisoned".into()))?;
            entries.get(key).cloned()
        };

        match hit {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value)),
            Some(_) => {
                self.del(key).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Cache("cache lock poisoned".into()))?;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Cache("cache lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Cache tier that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CacheTier for NoopCache {
    async fn get(&self, _key: &str) -> StorageResult<Option<Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> StorageResult<()> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }
}
