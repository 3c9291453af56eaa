//! Explicit cache service context.
//!
//! Built once at startup and passed to whatever needs caching. Owns the
//! store backend, the memoizer wrapping it, the TTL table and the worker
//! pool; `close()` tears it all down.

#[cfg(feature = "redis")]
use crate::backend::RedisBackend;
use crate::backend::{CacheBackend, StoreStats};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::memoizer::Memoizer;
use crate::serialization::Codec;
use crate::ttl::{Category, TtlPolicy};
use crate::warmup::{WarmupConfig, WarmupReport, WarmupSource, Warmer};
use crate::worker::WorkerPool;
use serde::Serialize;

/// Overall verdict of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Store part of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    Connected,
    NotInitialized,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store: StoreHealth,
    pub message: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Cache service wrapping a backend.
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    memoizer: Memoizer<B>,
    policy: TtlPolicy,
    workers: WorkerPool,
    warmup: WarmupConfig,
}

impl<B: CacheBackend> CacheService<B> {
    /// Assemble a service around an already constructed backend.
    ///
    /// # Errors
    /// `Error::ConfigError` if a category used by the warm-up has no TTL.
    pub fn new(backend: B, config: &CacheConfig) -> Result<Self> {
        let policy = TtlPolicy::financial_defaults().with_overrides(&config.ttl_overrides);
        policy.ensure_registered(config.warmup.categories())?;

        let memoizer = Memoizer::new(backend)
            .with_codec(Codec::new(config.compression_level))
            .with_single_flight(config.single_flight);

        Ok(CacheService {
            memoizer,
            policy,
            workers: WorkerPool::new(config.workers),
            warmup: config.warmup.clone(),
        })
    }

    pub fn memoizer(&self) -> &Memoizer<B> {
        &self.memoizer
    }

    pub fn backend(&self) -> &B {
        self.memoizer.backend()
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Resolve a category handle for memoized calls.
    ///
    /// # Errors
    /// `Error::ConfigError` when the category has no TTL.
    pub fn category(&self, name: &str) -> Result<Category> {
        self.policy.category(name)
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.backend().state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(Error::ConnectionError(format!(
                "cache store is not initialized ({})",
                state
            )))
        }
    }

    /// Drop every cached entry.
    ///
    /// # Errors
    /// `Error::ConnectionError` when the store is not ready, or the store's
    /// own error when the flush fails.
    pub async fn clear_all(&self) -> Result<()> {
        self.ensure_ready()?;
        self.backend().clear_all().await.map_err(|e| {
            error!("Error clearing cache: {}", e);
            e
        })?;
        info!("Cache cleared successfully");
        Ok(())
    }

    /// Store statistics.
    ///
    /// # Errors
    /// `Error::ConnectionError` when the store is not ready.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.ensure_ready()?;
        self.backend().stats().await
    }

    /// Probe the store. Never fails; problems are reported in the result.
    pub async fn health(&self) -> HealthReport {
        if !self.backend().state().is_ready() {
            return HealthReport {
                status: HealthStatus::Unhealthy,
                store: StoreHealth::NotInitialized,
                message: "Cache store not initialized".to_string(),
            };
        }

        match self.backend().health_check().await {
            Ok(true) => HealthReport {
                status: HealthStatus::Healthy,
                store: StoreHealth::Connected,
                message: "Cache store is working correctly".to_string(),
            },
            Ok(false) => HealthReport {
                status: HealthStatus::Unhealthy,
                store: StoreHealth::Error,
                message: "Cache store did not answer the health check".to_string(),
            },
            Err(e) => HealthReport {
                status: HealthStatus::Unhealthy,
                store: StoreHealth::Error,
                message: format!("Cache store error: {}", e),
            },
        }
    }

    /// Run CPU-bound work on the bounded worker pool.
    ///
    /// # Errors
    /// `Error::WorkerError` if the job panicked or the pool is closed.
    pub async fn offload<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.workers.run(job).await
    }

    /// Run the configured warm-up pass, unless disabled.
    ///
    /// # Errors
    /// `Error::ConfigError` if a configured category has no TTL. Individual
    /// fetch failures are reported in the returned [`WarmupReport`].
    pub async fn warm_up<S: WarmupSource>(&self, source: &S) -> Result<Option<WarmupReport>> {
        if !self.warmup.enabled {
            info!("Cache warm-up disabled");
            return Ok(None);
        }
        let warmer = Warmer::new(&self.memoizer, &self.policy, &self.warmup)?;
        Ok(Some(warmer.run(source).await))
    }

    /// Release the store connection and stop accepting off-loaded work.
    pub async fn close(&self) {
        self.workers.close();
        self.backend().close().await;
    }
}

#[cfg(feature = "redis")]
impl CacheService<RedisBackend> {
    /// Connect to Redis and fail if it is unreachable.
    ///
    /// # Errors
    /// `Error::ConfigError` for an invalid URL or pool setup,
    /// `Error::ConnectionError` when the store does not answer.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let backend = RedisBackend::new(config.redis.clone())?;
        backend.connect().await?;
        Self::new(backend, config)
    }

    /// Connect to Redis, or keep going with caching disabled when it is
    /// unreachable. The service still works; every call reaches its producer.
    ///
    /// # Errors
    /// `Error::ConfigError` for an invalid URL, pool setup or TTL table.
    pub async fn start(config: &CacheConfig) -> Result<Self> {
        let backend = RedisBackend::new(config.redis.clone())?;
        if let Err(e) = backend.connect().await {
            warn!("⚠ Failed to initialize Redis, running without cache: {}", e);
        }
        Self::new(backend, config)
    }
}
