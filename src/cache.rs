//! Volatile cache tier
//!
//! Entries are opaque byte payloads with a per-entry TTL. Callers treat
//! every error from this tier as a miss.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fjall::Keyspace;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task;

use crate::error::CacheError;
use crate::models::{ForecastKind, LocationId};

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Key of the cached record list for one (kind, location) pair
#[must_use]
pub fn cache_key(kind: ForecastKind, location_id: LocationId) -> String {
    format!("weather:{kind}:{location_id}")
}

#[async_trait]
pub trait VolatileCache: Send + Sync {
    /// Returns `None` for missing or expired entries.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache, lost on restart
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolatileCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if now < entry.expires_at => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired; drop it unless a writer refreshed it meanwhile
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::backend("TTL overflow"))?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: u64, // Unix timestamp (seconds)
}

/// Cache persisted in an embedded fjall keyspace, survives restarts
pub struct PersistentCache {
    _db: fjall::Database,
    store: Keyspace,
}

fn get_from_store(store: &Keyspace, key: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
    Ok(store
        .get(key)
        .map_err(CacheError::backend)?
        .map(|v| v.to_vec()))
}

fn unix_now() -> CacheResult<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(CacheError::backend)?
        .as_secs())
}

impl PersistentCache {
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let db = fjall::Database::builder(&path)
            .open()
            .map_err(CacheError::backend)?;
        let store = db
            .keyspace("cache", fjall::KeyspaceCreateOptions::default)
            .map_err(CacheError::backend)?;
        Ok(PersistentCache { _db: db, store })
    }

    /// Manually removes a key from the cache.
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        let key = key.as_bytes().to_vec();
        let store = self.store.clone();
        task::spawn_blocking(move || store.remove(key))
            .await
            .map_err(CacheError::backend)?
            .map_err(CacheError::backend)?;
        Ok(())
    }
}

#[async_trait]
impl VolatileCache for PersistentCache {
    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();

        let maybe_bytes = task::spawn_blocking(move || get_from_store(&store, key_bytes))
            .await
            .map_err(CacheError::backend)??;

        let Some(bytes) = maybe_bytes else {
            tracing::debug!("Key not found");
            return Ok(None);
        };

        let entry: StoredEntry = postcard::from_bytes(&bytes).map_err(CacheError::encoding)?;
        if unix_now()? < entry.expires_at {
            tracing::debug!("Key found and still fresh");
            Ok(Some(entry.value))
        } else {
            tracing::debug!("Key found but expired");
            self.remove(key).await?;
            Ok(None)
        }
    }

    #[tracing::instrument(name = "put_cache", level = "debug", skip(self, value))]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        let expires_at = unix_now()?
            .checked_add(ttl.as_secs())
            .ok_or_else(|| CacheError::backend("TTL overflow"))?;
        let bytes =
            postcard::to_stdvec(&StoredEntry { value, expires_at }).map_err(CacheError::encoding)?;

        task::spawn_blocking(move || store.insert(key, bytes))
            .await
            .map_err(CacheError::backend)?
            .map_err(CacheError::backend)?;
        Ok(())
    }
}
