//! Configuration loaded from environment variables.
//!
//! Every setting has a default. A value that is set but cannot be parsed is
//! logged and replaced by the default, so a typo never prevents startup.

#[cfg(feature = "redis")]
use crate::backend::RedisConfig;
use crate::key::KeyArgs;
use crate::serialization::DEFAULT_COMPRESSION_LEVEL;
use crate::warmup::{WarmupConfig, DEFAULT_MIN_MARKET_CAP};
use crate::worker::DEFAULT_WORKERS;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const TTL_PREFIX: &str = "CACHE_TTL_";

/// Longest accepted TTL override, one year.
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Cache layer configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    #[cfg(feature = "redis")]
    pub redis: RedisConfig,
    /// gzip level for compressed payloads, 0..=9.
    pub compression_level: u32,
    pub single_flight: bool,
    /// Concurrent off-loaded jobs.
    pub workers: usize,
    /// Per-category TTLs replacing the built-in table.
    pub ttl_overrides: HashMap<String, Duration>,
    pub warmup: WarmupConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            #[cfg(feature = "redis")]
            redis: RedisConfig::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            single_flight: true,
            workers: DEFAULT_WORKERS,
            ttl_overrides: HashMap::new(),
            warmup: WarmupConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load from the process environment.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - store address (default: `redis://127.0.0.1:6379/0`)
    /// - `REDIS_POOL_SIZE` - pooled connections (default: 16)
    /// - `REDIS_CONNECT_TIMEOUT_SECS` - connect/wait timeout (default: 5)
    /// - `CACHE_COMPRESSION_LEVEL` - gzip level 0-9 (default: 6)
    /// - `CACHE_SINGLE_FLIGHT` - coalesce concurrent misses (default: true)
    /// - `CACHE_WORKERS` - off-load pool size (default: 4)
    /// - `CACHE_TTL_<CATEGORY>` - TTL override in seconds, e.g. `CACHE_TTL_MARKET_NEWS=120`
    /// - `CACHE_WARMUP_ENABLED` (default: true), `CACHE_WARMUP_FLUSH` (default: true)
    /// - `CACHE_WARMUP_LIMIT` - listed identifiers to warm (default: 25)
    /// - `CACHE_WARMUP_MIN_MARKET_CAP` - ticker list filter (default: 1e12)
    /// - `CACHE_WARMUP_AUXILIARY` - comma list (default: `^GSPC,^VIX,^DJI,^IXIC`)
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut config = CacheConfig::default();

        #[cfg(feature = "redis")]
        {
            if let Some(url) = vars.get("REDIS_URL").filter(|u| !u.trim().is_empty()) {
                config.redis.url = url.trim().to_string();
            }
            config.redis.pool_size = parse_or(&vars, "REDIS_POOL_SIZE", config.redis.pool_size)
                .max(1);
            config.redis.connection_timeout = Duration::from_secs(parse_or(
                &vars,
                "REDIS_CONNECT_TIMEOUT_SECS",
                config.redis.connection_timeout.as_secs(),
            ));
        }

        let level = parse_or(&vars, "CACHE_COMPRESSION_LEVEL", config.compression_level);
        if level <= 9 {
            config.compression_level = level;
        } else {
            warn!(
                "⚠ CACHE_COMPRESSION_LEVEL={} out of range 0-9, using {}",
                level, config.compression_level
            );
        }

        config.single_flight = flag_or(&vars, "CACHE_SINGLE_FLIGHT", config.single_flight);
        config.workers = parse_or(&vars, "CACHE_WORKERS", config.workers).max(1);
        config.ttl_overrides = ttl_overrides(&vars);

        let warmup = &mut config.warmup;
        warmup.enabled = flag_or(&vars, "CACHE_WARMUP_ENABLED", warmup.enabled);
        warmup.flush_on_start = flag_or(&vars, "CACHE_WARMUP_FLUSH", warmup.flush_on_start);
        warmup.max_identifiers = parse_or(&vars, "CACHE_WARMUP_LIMIT", warmup.max_identifiers);
        if vars.contains_key("CACHE_WARMUP_MIN_MARKET_CAP") {
            let floor = parse_or(&vars, "CACHE_WARMUP_MIN_MARKET_CAP", DEFAULT_MIN_MARKET_CAP);
            warmup.list_args = KeyArgs::new().kwarg("market_cap", floor);
        }
        if let Some(list) = vars.get("CACHE_WARMUP_AUXILIARY") {
            warmup.auxiliary = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match vars.get(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("⚠ Invalid value {}={:?}, using {}", name, raw, default);
            default
        }),
    }
}

fn flag_or(vars: &HashMap<String, String>, name: &str, default: bool) -> bool {
    let Some(raw) = vars.get(name) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!("⚠ Invalid value {}={:?}, using {}", name, raw, default);
            default
        }
    }
}

fn ttl_overrides(vars: &HashMap<String, String>) -> HashMap<String, Duration> {
    vars.iter()
        .filter_map(|(name, raw)| {
            let category = name.strip_prefix(TTL_PREFIX)?.to_ascii_lowercase();
            match raw.trim().parse::<u64>() {
                Ok(secs) if (1..=MAX_TTL_SECS).contains(&secs) && !category.is_empty() => {
                    Some((category, Duration::from_secs(secs)))
                }
                _ => {
                    warn!("⚠ Ignoring TTL override {}={:?}", name, raw);
                    None
                }
            }
        })
        .collect()
}
