//! Cache store backends.
//!
//! A backend is a remote (or in-process) key-value store with expiring sets.
//! All operations except `connect`/`close` may be called concurrently from
//! many in-flight requests; clones share one connection pool and one
//! [`ConnectionState`].

use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "inmemory")]
mod inmemory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig};

/// Lifecycle of a store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Closed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Uninitialized => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Closed => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Connection state shared between clones of a backend.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        StateCell(Arc::new(AtomicU8::new(initial.as_u8())))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Store statistics, as reported to the administrative surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_keys: u64,
    pub memory_used: String,
    pub hit_rate: String,
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
    pub expired: u64,
    pub connected_clients: u64,
    /// Seconds since the store started.
    pub uptime: u64,
}

/// `hits / (hits + misses)` as a percentage string; `"0%"` before any lookup.
pub fn format_hit_rate(hits: u64, misses: u64) -> String {
    let total = hits + misses;
    if total == 0 {
        "0%".to_string()
    } else {
        format!("{:.2}%", hits as f64 / total as f64 * 100.0)
    }
}

/// Human readable byte count in the style of Redis' `used_memory_human`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{:.2}{}", value, unit)
}

/// Async key-value store used by the memoizer.
pub trait CacheBackend: Clone + Send + Sync + 'static {
    /// Establish the connection and verify liveness.
    ///
    /// # Errors
    /// `Error::ConnectionError` when the liveness check fails.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Release the connection. Subsequent lookups see a non-ready store.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn state(&self) -> ConnectionState;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Unconditional overwrite; `ttl` makes the entry expire in the store.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Ping the store. `Ok(false)` means reachable but unhealthy.
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Drop every entry in the current database.
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send;

    fn stats(&self) -> impl Future<Output = Result<StoreStats>> + Send;
}
