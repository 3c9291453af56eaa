//! Builder pattern for memoized calls.

use crate::backend::CacheBackend;
use crate::key::KeyArgs;
use crate::memoizer::Memoizer;
use crate::strategy::CacheStrategy;
use crate::ttl::Category;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Fluent builder for a single memoized call.
///
/// Collects the key arguments, strategy and an optional TTL override, then
/// runs the producer through the memoizer.
///
/// # Example
///
/// ```ignore
/// let news: Value = memoizer
///     .call(&news_category)
///     .arg("AAPL")
///     .kwarg("limit", 50)
///     .with_ttl(Duration::from_secs(120))
///     .run(|| fetch_news("AAPL"))
///     .await?;
/// ```
pub struct MemoizeCall<'a, B: CacheBackend> {
    memoizer: &'a Memoizer<B>,
    category: Category,
    args: KeyArgs,
    strategy: CacheStrategy,
}

impl<'a, B: CacheBackend> MemoizeCall<'a, B> {
    pub(crate) fn new(memoizer: &'a Memoizer<B>, category: &Category) -> Self {
        Self {
            memoizer,
            category: category.clone(),
            args: KeyArgs::new(),
            strategy: CacheStrategy::Refresh,
        }
    }

    /// Append a positional key argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args = self.args.arg(value);
        self
    }

    /// Set a keyword key argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args = self.args.kwarg(name, value);
        self
    }

    /// Replace the key arguments collected so far.
    pub fn with_args(mut self, args: KeyArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the category TTL for this call only.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.category = self.category.with_ttl(ttl);
        self
    }

    /// Run the call.
    ///
    /// # Errors
    ///
    /// Only the producer's own error; see [`Memoizer::get_or_compute`].
    pub async fn run<T, E, F, Fut>(self, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.memoizer
            .execute(&self.category, &self.args, self.strategy, producer)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::key::CacheKeyBuilder;
    use crate::ttl::{categories, TtlPolicy};
    use serde_json::json;

    fn history() -> Category {
        TtlPolicy::financial_defaults()
            .category(categories::TICKER_HISTORY)
            .expect("Category not registered")
    }

    #[tokio::test]
    async fn test_builder_uses_same_key_as_get_or_compute() {
        let backend = InMemoryBackend::new();
        let memoizer = Memoizer::new(backend.clone());
        let category = history();

        let _: Value = memoizer
            .call(&category)
            .arg("AAPL")
            .kwarg("period", "1y")
            .run(|| async { Ok::<_, String>(json!([{"Close": 1.0}])) })
            .await
            .expect("Failed to execute");

        let args = KeyArgs::single("AAPL").kwarg("period", "1y");
        let cached: Value = memoizer
            .get_or_compute(&category, &args, || async {
                Err::<Value, String>("must hit".to_string())
            })
            .await
            .expect("Expected a hit");
        assert_eq!(cached, json!([{"Close": 1.0}]));
        assert!(backend
            .exists(&CacheKeyBuilder::build(category.name(), &args))
            .await
            .expect("Failed to check"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_builder_ttl_override() {
        let backend = InMemoryBackend::new();
        let memoizer = Memoizer::new(backend.clone());
        let category = history();

        let _: Value = memoizer
            .call(&category)
            .arg("SPY")
            .with_ttl(Duration::from_secs(10))
            .run(|| async { Ok::<_, String>(json!(1)) })
            .await
            .expect("Failed to execute");

        tokio::time::advance(Duration::from_secs(11)).await;

        let key = CacheKeyBuilder::build(category.name(), &KeyArgs::single("SPY"));
        assert!(!backend.exists(&key).await.expect("Failed to check"));
        assert_eq!(category.ttl(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_builder_kwarg_order_shares_entry() {
        let memoizer = Memoizer::new(InMemoryBackend::new());
        let category = history();

        let _: Value = memoizer
            .call(&category)
            .kwarg("period", "1y")
            .kwarg("interval", "1d")
            .run(|| async { Ok::<_, String>(json!("first")) })
            .await
            .expect("Failed to execute");

        let cached: Value = memoizer
            .call(&category)
            .kwarg("interval", "1d")
            .kwarg("period", "1y")
            .run(|| async { Ok::<_, String>(json!("second")) })
            .await
            .expect("Failed to execute");
        assert_eq!(cached, json!("first"));
    }
}
