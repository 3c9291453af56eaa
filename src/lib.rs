//! # market-cache
//!
//! Async memoization layer for slow, rate-limited market-data calls.
//!
//! ## Features
//!
//! - **Content-addressed keys:** `category:digest` derived from the call arguments
//! - **Tagged payloads:** gzip-compressed binary with a JSON fallback, and
//!   transparent reads of untagged legacy entries
//! - **Per-category TTLs:** a category without a TTL is a startup error
//! - **Fail open:** an unreachable or misbehaving store never fails a request
//! - **Self-healing:** undecodable entries are deleted and recomputed
//! - **Single-flight:** concurrent misses on one key share one upstream call
//! - **Warm-up:** bounded, failure-tolerant cache population at startup
//!
//! ## Quick Start
//!
//! ```ignore
//! use market_cache::{CacheConfig, CacheService};
//! use market_cache::key::KeyArgs;
//! use market_cache::ttl::categories;
//!
//! let config = CacheConfig::from_env();
//! let service = CacheService::start(&config).await?;
//!
//! let info = service.category(categories::TICKER_INFO)?;
//! let quote: serde_json::Value = service
//!     .memoizer()
//!     .get_or_compute(&info, &KeyArgs::single("AAPL"), || fetch_info("AAPL"))
//!     .await?;
//!
//! service.warm_up(&market_source).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod builder;
pub mod config;
pub mod error;
mod inflight;
pub mod key;
pub mod memoizer;
pub mod observability;
pub mod serialization;
pub mod service;
pub mod strategy;
pub mod ttl;
pub mod warmup;
pub mod worker;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use builder::MemoizeCall;
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use key::{CacheKeyBuilder, KeyArgs};
pub use memoizer::Memoizer;
pub use serialization::Codec;
pub use service::{CacheService, HealthReport};
pub use strategy::CacheStrategy;
pub use ttl::{Category, TtlPolicy};
pub use warmup::{WarmupConfig, WarmupReport, WarmupSource, Warmer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
