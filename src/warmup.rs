//! Startup cache warm-up.
//!
//! Fetches the authoritative identifier list through the memoizer, then walks
//! a bounded subset of it (plus a fixed set of auxiliary identifiers) and
//! runs every per-identifier category once. Individual failures are logged
//! and skipped; the pass always completes and nothing is retried.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::key::KeyArgs;
use crate::memoizer::Memoizer;
use crate::ttl::{categories, Category, TtlPolicy};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Market-cap floor used for the default ticker list.
pub const DEFAULT_MIN_MARKET_CAP: u64 = 1_000_000_000_000;

/// Default bound on listed identifiers warmed at startup.
pub const DEFAULT_MAX_IDENTIFIERS: usize = 25;

/// Index symbols warmed on every start.
pub const DEFAULT_AUXILIARY: [&str; 4] = ["^GSPC", "^VIX", "^DJI", "^IXIC"];

/// Upstream calls the warm-up pass needs.
pub trait WarmupSource: Send + Sync {
    type Error: Display + Send;

    /// Authoritative identifier list, e.g. every symbol above a market cap.
    fn identifiers(
        &self,
        args: &KeyArgs,
    ) -> impl Future<Output = std::result::Result<Vec<String>, Self::Error>> + Send;

    /// Fetch one category of data for one identifier.
    fn fetch(
        &self,
        category: &str,
        identifier: &str,
    ) -> impl Future<Output = std::result::Result<Value, Self::Error>> + Send;
}

/// What to warm, and how.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Flush the store before warming.
    pub flush_on_start: bool,
    /// At most this many listed identifiers are warmed.
    pub max_identifiers: usize,
    pub list_category: String,
    pub list_args: KeyArgs,
    /// Categories run for every identifier, in order.
    pub per_identifier_categories: Vec<String>,
    /// Always warmed, whether or not the list fetch succeeds.
    pub auxiliary: Vec<String>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        WarmupConfig {
            enabled: true,
            flush_on_start: true,
            max_identifiers: DEFAULT_MAX_IDENTIFIERS,
            list_category: categories::TICKER_LIST.to_string(),
            list_args: KeyArgs::new().kwarg("market_cap", DEFAULT_MIN_MARKET_CAP),
            per_identifier_categories: vec![
                categories::TICKER_INFO.to_string(),
                categories::TICKER_HISTORY.to_string(),
            ],
            auxiliary: DEFAULT_AUXILIARY.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WarmupConfig {
    /// Every category the warm-up touches.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.list_category.as_str())
            .chain(self.per_identifier_categories.iter().map(String::as_str))
    }
}

/// A single failed warm-up item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmupFailure {
    pub identifier: String,
    pub category: String,
    pub reason: String,
}

/// Outcome of a warm-up pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupReport {
    pub flushed: bool,
    /// Identifiers returned by the list fetch, before bounding.
    pub listed: usize,
    /// Identifiers whose categories all succeeded.
    pub warmed: usize,
    pub failures: Vec<WarmupFailure>,
    pub elapsed: Duration,
}

impl WarmupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs warm-up passes against a memoizer.
pub struct Warmer<'a, B: CacheBackend> {
    memoizer: &'a Memoizer<B>,
    config: &'a WarmupConfig,
    list: Category,
    per_identifier: Vec<Category>,
}

impl<'a, B: CacheBackend> Warmer<'a, B> {
    /// Resolve the configured categories.
    ///
    /// # Errors
    /// `Error::ConfigError` if any configured category has no TTL.
    pub fn new(
        memoizer: &'a Memoizer<B>,
        policy: &TtlPolicy,
        config: &'a WarmupConfig,
    ) -> Result<Self> {
        policy.ensure_registered(config.categories())?;

        Ok(Warmer {
            memoizer,
            config,
            list: policy.category(&config.list_category)?,
            per_identifier: config
                .per_identifier_categories
                .iter()
                .map(|name| policy.category(name))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Run one warm-up pass. Never fails; problems end up in the report.
    pub async fn run<S: WarmupSource>(&self, source: &S) -> WarmupReport {
        let started = Instant::now();
        let mut report = WarmupReport::default();

        if self.config.flush_on_start {
            report.flushed = self.flush().await;
        }

        info!("Populating cache with identifier list ({})", self.list.name());
        let listed = self
            .memoizer
            .get_or_compute(&self.list, &self.config.list_args, || {
                source.identifiers(&self.config.list_args)
            })
            .await
            .unwrap_or_else(|e| {
                error!("Failed to fetch identifier list: {}", e);
                report.failures.push(WarmupFailure {
                    identifier: "*".to_string(),
                    category: self.list.name().to_string(),
                    reason: e.to_string(),
                });
                Vec::new()
            });
        report.listed = listed.len();

        let identifiers = self.select(listed);
        info!("Warming {} identifiers", identifiers.len());

        for identifier in &identifiers {
            match self.warm_one(source, identifier).await {
                Ok(()) => report.warmed += 1,
                Err(failure) => {
                    warn!(
                        "Failed to cache {} for {}: {}",
                        failure.category, failure.identifier, failure.reason
                    );
                    report.failures.push(failure);
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Initial cache population completed: {}/{} warmed, {} failures in {:?}",
            report.warmed,
            identifiers.len(),
            report.failures.len(),
            report.elapsed
        );
        report
    }

    async fn flush(&self) -> bool {
        let backend = self.memoizer.backend();
        if !backend.state().is_ready() {
            warn!("Skipping cache flush, store is {}", backend.state());
            return false;
        }
        match backend.clear_all().await {
            Ok(()) => {
                info!("Cache cleared before warm-up");
                true
            }
            Err(e) => {
                warn!("Failed to clear cache before warm-up: {}", e);
                false
            }
        }
    }

    /// Bounded, de-duplicated listed identifiers followed by auxiliaries.
    fn select(&self, listed: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut selected: Vec<String> = listed
            .into_iter()
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .take(self.config.max_identifiers)
            .collect();
        for id in &self.config.auxiliary {
            if !selected.contains(id) {
                selected.push(id.clone());
            }
        }
        selected
    }

    async fn warm_one<S: WarmupSource>(
        &self,
        source: &S,
        identifier: &str,
    ) -> std::result::Result<(), WarmupFailure> {
        debug!("Caching data for {}", identifier);
        let args = KeyArgs::single(identifier);

        for category in &self.per_identifier {
            let _: Value = self
                .memoizer
                .get_or_compute(category, &args, || source.fetch(category.name(), identifier))
                .await
                .map_err(|e| WarmupFailure {
                    identifier: identifier.to_string(),
                    category: category.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}
