//! Warm-up and memoization against an in-process store.
//!
//! Run with `cargo run --example market_warmup`.

use market_cache::backend::InMemoryBackend;
use market_cache::key::{CacheKeyBuilder, KeyArgs};
use market_cache::ttl::categories;
use market_cache::{CacheConfig, CacheService, CacheStrategy, WarmupSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: f64,
    market_cap: u64,
}

/// Stand-in for the listings table and the quote provider.
struct FakeMarket {
    upstream_calls: AtomicUsize,
}

impl FakeMarket {
    const LISTINGS: [(&'static str, u64); 5] = [
        ("AAPL", 3_400_000_000_000),
        ("MSFT", 3_100_000_000_000),
        ("NVDA", 2_900_000_000_000),
        ("GOOG", 2_100_000_000_000),
        ("TINY", 40_000_000),
    ];

    fn quote(&self, symbol: &str) -> Result<Quote, String> {
        self.upstream_calls.fetch_add(1, Ordering::SeqCst);
        Self::LISTINGS
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(s, cap)| Quote {
                symbol: s.to_string(),
                price: (*cap / 15_000_000_000) as f64 + 0.25,
                market_cap: *cap,
            })
            .ok_or_else(|| format!("No data found for ticker {}", symbol))
    }
}

impl WarmupSource for FakeMarket {
    type Error = String;

    async fn identifiers(&self, args: &KeyArgs) -> Result<Vec<String>, String> {
        let floor = args
            .keyword()
            .get("market_cap")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(Self::LISTINGS
            .iter()
            .filter(|(_, cap)| *cap > floor)
            .map(|(s, _)| s.to_string())
            .collect())
    }

    async fn fetch(&self, category: &str, identifier: &str) -> Result<Value, String> {
        if identifier.starts_with('^') {
            self.upstream_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({"symbol": identifier, "category": category, "level": 5_120.5}));
        }
        let quote = self.quote(identifier)?;
        match category {
            categories::TICKER_HISTORY => Ok(json!({
                "symbol": quote.symbol,
                "bars": (0..5).map(|d| json!({"day": d, "Close": quote.price + d as f64})).collect::<Vec<_>>(),
            })),
            _ => serde_json::to_value(quote).map_err(|e| e.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    println!("\n=== Market Cache - Warm-up Example ===\n");

    println!("1. Starting cache service on an in-memory store...");
    let mut config = CacheConfig::from_env();
    config.warmup.max_identifiers = 3;
    config
        .ttl_overrides
        .insert(categories::MARKET_NEWS.to_string(), Duration::from_secs(120));
    let service = CacheService::new(InMemoryBackend::new(), &config)?;
    println!("   ✓ {:?}\n", service.health().await);

    println!("2. Warming the cache...");
    let market = FakeMarket {
        upstream_calls: AtomicUsize::new(0),
    };
    if let Some(report) = service.warm_up(&market).await? {
        println!(
            "   ✓ listed {}, warmed {}, {} failures in {:?}\n",
            report.listed,
            report.warmed,
            report.failures.len(),
            report.elapsed
        );
    }

    println!("3. Request for a warmed ticker:");
    let info = service.category(categories::TICKER_INFO)?;
    let before = market.upstream_calls.load(Ordering::SeqCst);
    let quote: Quote = service
        .memoizer()
        .get_or_compute(&info, &KeyArgs::single("AAPL"), || async { market.quote("AAPL") })
        .await?;
    println!(
        "   ✓ {} at ${:.2} (upstream calls: {})\n",
        quote.symbol,
        quote.price,
        market.upstream_calls.load(Ordering::SeqCst) - before
    );

    println!("4. Corrupted entry heals itself:");
    let key = CacheKeyBuilder::build(info.name(), &KeyArgs::single("MSFT"));
    service.backend().corrupt(&key, b"COMPRESSED:not-gzip".to_vec());
    let quote: Quote = service
        .memoizer()
        .get_or_compute(&info, &KeyArgs::single("MSFT"), || async { market.quote("MSFT") })
        .await?;
    println!("   ✓ recomputed {} at ${:.2}\n", quote.symbol, quote.price);

    println!("5. Forced refresh with the call builder:");
    let refreshed: Quote = service
        .memoizer()
        .call(&info)
        .arg("NVDA")
        .with_strategy(CacheStrategy::Invalidate)
        .run(|| async { market.quote("NVDA") })
        .await?;
    println!("   ✓ {} refreshed\n", refreshed.symbol);

    println!("6. Off-loading a CPU-bound computation:");
    let closes: Vec<f64> = (0..252).map(|d| 150.0 + (d as f64 * 0.37).sin() * 12.5).collect();
    let mean = service
        .offload(move || closes.iter().sum::<f64>() / closes.len() as f64)
        .await?;
    println!("   ✓ mean close {:.2}\n", mean);

    println!("7. Store statistics:");
    let stats = service.stats().await?;
    println!("{}\n", serde_json::to_string_pretty(&stats)?);
    println!(
        "   keys in store: {}, total upstream calls: {}",
        service.backend().len(),
        market.upstream_calls.load(Ordering::SeqCst)
    );

    service.close().await;
    println!("\n=== Example Complete ===\n");
    Ok(())
}
