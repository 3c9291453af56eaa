//! TTL policy per data category.
//!
//! Every category handed to the memoizer must have a registered TTL. The only
//! way to obtain a [`Category`] is through [`TtlPolicy::category`], which
//! fails with a configuration error for unknown names, so call sites resolve
//! their categories once at startup.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Well-known category names.
pub mod categories {
    pub const TICKER_LIST: &str = "ticker_list";
    pub const TICKER_INFO: &str = "ticker_info";
    pub const TICKER_HISTORY: &str = "ticker_history";
    pub const SUMMARY: &str = "summary";
    pub const MARKET_SUMMARY: &str = "market_summary";
    pub const ALPHA_VANTAGE: &str = "alpha_vantage";
    pub const MARKET_NEWS: &str = "market_news";
    pub const COMPANY_OVERVIEW: &str = "company_overview";
}

const HOUR: u64 = 3600;

/// A namespace for cached values together with its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    ttl: Duration,
}

impl Category {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Same category with a TTL chosen by the call site.
    pub fn with_ttl(&self, ttl: Duration) -> Category {
        Category {
            name: self.name.clone(),
            ttl,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ttl {}s)", self.name, self.ttl.as_secs())
    }
}

/// Static category → TTL table.
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    entries: HashMap<String, Duration>,
}

impl TtlPolicy {
    /// Empty policy; every lookup fails until categories are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// TTLs used by the market data service.
    pub fn financial_defaults() -> Self {
        use categories::*;

        Self::new()
            .register(TICKER_LIST, Duration::from_secs(HOUR))
            .register(TICKER_INFO, Duration::from_secs(HOUR))
            .register(TICKER_HISTORY, Duration::from_secs(HOUR))
            .register(SUMMARY, Duration::from_secs(900))
            .register(MARKET_SUMMARY, Duration::from_secs(300))
            // upstream is rate limited
            .register(ALPHA_VANTAGE, Duration::from_secs(1800))
            .register(MARKET_NEWS, Duration::from_secs(600))
            .register(COMPANY_OVERVIEW, Duration::from_secs(HOUR))
    }

    /// Register (or replace) the TTL of a category.
    pub fn register(mut self, name: impl Into<String>, ttl: Duration) -> Self {
        self.entries.insert(name.into(), ttl);
        self
    }

    /// Apply overrides, e.g. from configuration. Overrides may add categories.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Duration)>,
    {
        for (name, ttl) in overrides {
            debug!("TTL override: {} -> {}s", name, ttl.as_secs());
            self.entries.insert(name.clone(), *ttl);
        }
        self
    }

    /// TTL of a registered category.
    ///
    /// # Errors
    /// `Error::ConfigError` when the category is not registered.
    pub fn ttl_for(&self, name: &str) -> Result<Duration> {
        self.entries.get(name).copied().ok_or_else(|| {
            Error::ConfigError(format!("no TTL registered for category '{}'", name))
        })
    }

    /// Resolve a category handle.
    ///
    /// # Errors
    /// `Error::ConfigError` when the category is not registered.
    pub fn category(&self, name: &str) -> Result<Category> {
        Ok(Category {
            name: name.to_string(),
            ttl: self.ttl_for(name)?,
        })
    }

    /// Startup assertion that every category in `names` has a TTL.
    pub fn ensure_registered<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let missing: Vec<&str> = names
            .into_iter()
            .filter(|n| !self.entries.contains_key(*n))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigError(format!(
                "no TTL registered for categories: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
