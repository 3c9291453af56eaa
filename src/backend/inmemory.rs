//! In-process cache backend.
//!
//! Expiry is measured on the tokio clock so tests can drive it with a paused
//! runtime.

use super::{format_hit_rate, human_bytes, CacheBackend, ConnectionState, StateCell, StoreStats};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
}

/// DashMap-backed store with per-entry expiry.
///
/// Starts in the `Ready` state; `close()` takes it out of service until
/// `connect()` is called again.
///
/// # Example
///
/// ```
/// # use market_cache::backend::{CacheBackend, InMemoryBackend};
/// # async fn example() -> market_cache::Result<()> {
/// let backend = InMemoryBackend::new();
/// backend.set("key", b"value".to_vec(), None).await?;
/// assert_eq!(backend.get("key").await?, Some(b"value".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    entries: Arc<DashMap<String, StoredEntry>>,
    counters: Arc<Counters>,
    state: StateCell,
    capacity: Option<usize>,
    started: Instant,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend {
            entries: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            state: StateCell::new(ConnectionState::Ready),
            capacity: None,
            started: Instant::now(),
        }
    }

    /// Bound the number of entries; inserting a new key into a full store
    /// evicts an existing one.
    pub fn with_capacity(mut self, max_entries: usize) -> Self {
        self.capacity = Some(max_entries.max(1));
        self
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite the raw payload of an existing key, keeping its expiry.
    /// Returns false when the key is absent.
    pub fn corrupt(&self, key: &str, payload: Vec<u8>) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.payload = payload;
                true
            }
            None => false,
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state.get() {
            ConnectionState::Ready => Ok(()),
            state => Err(Error::BackendError(format!("in-memory store is {}", state))),
        }
    }

    fn evict_one(&self) {
        let victim = self.entries.iter().next().map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            debug!("InMemory EVICT {}", key);
        }
    }
}

impl CacheBackend for InMemoryBackend {
    async fn connect(&self) -> Result<()> {
        self.state.set(ConnectionState::Ready);
        Ok(())
    }

    async fn close(&self) {
        self.state.set(ConnectionState::Closed);
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_ready()?;
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.payload.clone()));
            }
            None => false,
        };

        if expired && self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("✓ InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_ready()?;

        if let Some(max) = self.capacity {
            if self.entries.len() >= max && !self.entries.contains_key(key) {
                self.evict_one();
            }
        }

        let entry = StoredEntry {
            payload: value,
            // a TTL past the clock's range never expires
            expires_at: ttl.and_then(|d| Instant::now().checked_add(d)),
        };
        self.entries.insert(key.to_string(), entry);
        debug!("✓ InMemory SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_ready()?;
        self.entries.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map_or(false, |entry| !entry.is_expired(now)))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.state.get().is_ready())
    }

    async fn clear_all(&self) -> Result<()> {
        self.ensure_ready()?;
        self.entries.clear();
        warn!("⚠ InMemory FLUSH executed - all cache cleared!");
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.ensure_ready()?;
        let now = Instant::now();

        let (total_keys, bytes) = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now))
            .fold((0u64, 0u64), |(n, b), e| {
                (n + 1, b + (e.key().len() + e.payload.len()) as u64)
            });

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);

        Ok(StoreStats {
            total_keys,
            memory_used: human_bytes(bytes),
            hit_rate: format_hit_rate(hits, misses),
            hits,
            misses,
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            connected_clients: 1,
            uptime: self.started.elapsed().as_secs(),
        })
    }
}
