//! Memoizer - compute-or-fetch wrapper around a cache backend.

use crate::backend::CacheBackend;
use crate::builder::MemoizeCall;
use crate::inflight::{Flight, InFlight};
use crate::key::{CacheKeyBuilder, KeyArgs};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::serialization::Codec;
use crate::strategy::CacheStrategy;
use crate::ttl::Category;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Caches the results of slow producers in a [`CacheBackend`].
///
/// Store problems never reach the caller: an unreachable store, a failed
/// read or a failed write all degrade to calling the producer. Producer
/// errors are returned unchanged.
///
/// # Example
///
/// ```
/// use market_cache::backend::InMemoryBackend;
/// use market_cache::key::KeyArgs;
/// use market_cache::ttl::{categories, TtlPolicy};
/// use market_cache::Memoizer;
/// use serde_json::{json, Value};
///
/// # async fn example() -> Result<(), String> {
/// let policy = TtlPolicy::financial_defaults();
/// let info = policy.category(categories::TICKER_INFO).map_err(|e| e.to_string())?;
/// let memoizer = Memoizer::new(InMemoryBackend::new());
///
/// let value: Value = memoizer
///     .get_or_compute(&info, &KeyArgs::single("AAPL"), || async {
///         Ok::<_, String>(json!({"symbol": "AAPL"}))
///     })
///     .await?;
/// assert_eq!(value["symbol"], "AAPL");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Memoizer<B: CacheBackend> {
    backend: B,
    codec: Codec,
    metrics: Arc<dyn CacheMetrics>,
    inflight: Option<Arc<InFlight>>,
}

impl<B: CacheBackend> Memoizer<B> {
    /// Memoizer with the default codec and single-flight enabled.
    pub fn new(backend: B) -> Self {
        Memoizer {
            backend,
            codec: Codec::default(),
            metrics: Arc::new(NoOpMetrics),
            inflight: Some(Arc::new(InFlight::new())),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Coalesce concurrent misses on the same key into one producer call.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(|| Arc::new(InFlight::new()));
        self
    }

    /// Start a fluent call for `category`.
    ///
    /// ```ignore
    /// let history: Value = memoizer
    ///     .call(&history_category)
    ///     .arg("AAPL")
    ///     .kwarg("period", "1y")
    ///     .run(|| fetch_history("AAPL"))
    ///     .await?;
    /// ```
    pub fn call(&self, category: &Category) -> MemoizeCall<'_, B> {
        MemoizeCall::new(self, category)
    }

    /// Return the cached value for `(category, args)`, or run `producer`,
    /// store its result with the category TTL and return it.
    ///
    /// # Errors
    ///
    /// Only the producer's own error, unchanged. A cache hit never calls the
    /// producer.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        category: &Category,
        args: &KeyArgs,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(category, args, CacheStrategy::Refresh, producer)
            .await
    }

    pub(crate) async fn execute<T, E, F, Fut>(
        &self,
        category: &Category,
        args: &KeyArgs,
        strategy: CacheStrategy,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let timer = Instant::now();
        let key = CacheKeyBuilder::build(category.name(), args);

        debug!("» Memoized call for key: {} (strategy: {})", key, strategy);

        let state = self.backend.state();
        if !state.is_ready() {
            warn!("Cache store is {}, computing {} without cache", state, key);
        } else if strategy.reads_cache() {
            if let Some(value) = self.lookup::<T>(&key).await {
                self.metrics.record_hit(&key, timer.elapsed());
                debug!("✓ Cache hit for {} in {:?}", key, timer.elapsed());
                return Ok(value);
            }
        } else if strategy == CacheStrategy::Invalidate {
            self.evict(&key).await;
        }

        self.metrics.record_miss(&key, timer.elapsed());

        match &self.inflight {
            Some(flights) => {
                let guard = flights.enter(&key);
                self.produce_in(guard.flight(), category, &key, producer)
                    .await
            }
            None => self.produce(category, &key, producer).await,
        }
    }

    /// Delete the stored entry for `(category, args)`.
    pub async fn invalidate(&self, category: &Category, args: &KeyArgs) {
        let key = CacheKeyBuilder::build(category.name(), args);
        if self.backend.state().is_ready() {
            self.evict(&key).await;
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                error!("Error getting cached data for {}: {}", key, e);
                return None;
            }
        };

        // null is never written, so a stored null is as bad as garbage
        let value = self
            .codec
            .decode(&bytes)
            .filter(|tree| !tree.is_null())
            .and_then(|tree| {
                serde_json::from_value::<T>(tree)
                    .map_err(|e| warn!("Cached entry {} has an unexpected shape: {}", key, e))
                    .ok()
            });

        if value.is_none() {
            warn!("Deleting corrupted cache entry: {}", key);
            self.metrics.record_corruption(key);
            self.evict(key).await;
        }
        value
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            self.metrics.record_error(key, &e.to_string());
            error!("Error deleting cache entry {}: {}", key, e);
        }
    }

    async fn produce<T, E, F, Fut>(&self, category: &Category, key: &str, producer: F) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = producer().await?;
        if let Some(tree) = to_tree(key, &value) {
            self.persist(category, key, &tree).await;
        }
        Ok(value)
    }

    /// Run the producer under the key's flight, or adopt the result a
    /// previous caller left there.
    async fn produce_in<T, E, F, Fut>(
        &self,
        flight: &Flight,
        category: &Category,
        key: &str,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut shared = flight.result.lock().await;

        if let Some(tree) = shared.as_ref() {
            match serde_json::from_value::<T>(tree.clone()) {
                Ok(value) => {
                    debug!("✓ Joined in-flight result for {}", key);
                    return Ok(value);
                }
                Err(e) => warn!("In-flight result for {} has an unexpected shape: {}", key, e),
            }
        }

        let value = producer().await?;
        if let Some(tree) = to_tree(key, &value) {
            self.persist(category, key, &tree).await;
            *shared = Some(tree);
        }
        Ok(value)
    }

    async fn persist(&self, category: &Category, key: &str, tree: &Value) {
        if tree.is_null() {
            debug!("Not caching empty result for {}", key);
            return;
        }
        if !self.backend.state().is_ready() {
            return;
        }

        let bytes = self.codec.encode(tree);
        match self.backend.set(key, bytes, Some(category.ttl())).await {
            Ok(()) => info!("Cached result for {} (ttl {}s)", key, category.ttl().as_secs()),
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                error!("Error caching result for {}: {}", key, e);
            }
        }
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Number of keys with a producer call in progress.
    pub fn in_flight(&self) -> usize {
        self.inflight.as_ref().map_or(0, |f| f.len())
    }
}

fn to_tree<T: Serialize>(key: &str, value: &T) -> Option<Value> {
    serde_json::to_value(value)
        .map_err(|e| warn!("Result for {} is not JSON-compatible, not caching: {}", key, e))
        .ok()
}
