//! In-memory [`DurableKeyStore`] and [`VolatileSessionCache`] implementations
//! with fault injection, for tests and local development.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::context::TraceContext;
use crate::crypto::password;
use crate::error::{SessionError, Result};
use crate::models::session_key::SessionKey;
use crate::repositories::session_cache::VolatileSessionCache;
use crate::repositories::session_key::{DurableKeyStore, Publish};

/// A durable row: raw key bytes plus expiration, as in the `session_key` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredKeyRow {
    pub key: Vec<u8>,
    pub expiration: DateTime<Utc>,
}

#[derive(Default)]
struct KeyStoreFaults {
    fail_insert: AtomicBool,
    fail_commit: AtomicBool,
}

/// In-memory [`DurableKeyStore`]. Clones share the same rows.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    rows: Arc<RwLock<HashMap<i64, StoredKeyRow>>>,
    faults: Arc<KeyStoreFaults>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent insert fail before anything is published.
    pub fn fail_insert(&self, fail: bool) {
        self.faults.fail_insert.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent commit fail after a successful publish.
    pub fn fail_commit(&self, fail: bool) {
        self.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// The committed row for `id`, regardless of expiration.
    pub async fn row(&self, id: i64) -> Option<StoredKeyRow> {
        self.rows.read().await.get(&id).cloned()
    }

    /// Number of committed rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether no rows are committed.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl DurableKeyStore for MemoryKeyStore {
    async fn insert_and_publish<'a>(
        &self,
        _ctx: &TraceContext,
        key: &SessionKey,
        publish: Publish<'a>,
    ) -> Result<()> {
        if self.faults.fail_insert.load(Ordering::SeqCst) {
            return Err(SessionError::Persistence("injected insert failure".to_string()));
        }

        let row = StoredKeyRow {
            key: key.decoded()?.to_vec(),
            expiration: key.expiration,
        };

        publish.await?;

        if self.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(SessionError::Persistence("injected commit failure".to_string()));
        }

        self.rows.write().await.entry(key.id).or_insert(row);
        Ok(())
    }

    async fn find(&self, _ctx: &TraceContext, id: i64) -> Result<Option<SessionKey>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&id)
            .filter(|row| row.expiration > Utc::now())
            .map(|row| SessionKey::from_raw(id, &row.key, row.expiration)))
    }

    async fn delete_matching(&self, _ctx: &TraceContext, id: i64, raw: &[u8]) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get(&id) {
            Some(row) if password::same_password(&row.key, raw) => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self, _ctx: &TraceContext) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        let now = Utc::now();
        rows.retain(|_, row| row.expiration > now);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory [`VolatileSessionCache`] with TTL. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    fail_set: Arc<AtomicBool>,
}

impl MemorySessionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail.
    pub fn fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    /// Writes a raw entry, bypassing every check.
    pub async fn insert_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// The remaining TTL of a live entry.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
            .filter(|ttl| !ttl.is_zero())
    }
}

#[async_trait]
impl VolatileSessionCache for MemorySessionCache {
    async fn get(&self, _ctx: &TraceContext, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, _ctx: &TraceContext, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(SessionError::Cache("injected set failure".to_string()));
        }

        self.insert_raw(key, value.to_vec(), ttl).await;
        Ok(())
    }

    async fn delete(&self, _ctx: &TraceContext, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
