use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use market_cache::key::{CacheKeyBuilder, KeyArgs};
use market_cache::Codec;
use serde_json::{json, Value};
use std::hint::black_box;

/// A year of daily bars, roughly what a history call returns.
fn daily_bars(days: usize) -> Value {
    let bars: Vec<Value> = (0..days)
        .map(|i| {
            let close = 150.0 + (i as f64 * 0.37).sin() * 12.5;
            json!({
                "Date": format!("2024-{:02}-{:02}", i / 28 % 12 + 1, i % 28 + 1),
                "Open": close - 0.8,
                "High": close + 1.9,
                "Low": close - 2.1,
                "Close": close,
                "Volume": 48_000_000 + (i as u64 * 7_919) % 5_000_000,
            })
        })
        .collect();
    json!({"symbol": "AAPL", "interval": "1d", "bars": bars})
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_encode");
    for days in [5usize, 252] {
        let value = daily_bars(days);
        for level in [1u32, 6, 9] {
            let codec = Codec::new(level);
            group.bench_with_input(
                BenchmarkId::new(format!("level_{}", level), days),
                &value,
                |b, v| b.iter(|| codec.encode(black_box(v))),
            );
        }
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = Codec::default();
    let value = daily_bars(252);
    let compressed = codec.encode(&value);
    let mut json_tagged = b"JSON:".to_vec();
    json_tagged.extend(serde_json::to_vec(&value).unwrap_or_default());
    let legacy = serde_json::to_vec(&value).unwrap_or_default();

    let mut group = c.benchmark_group("codec_decode");
    group.bench_function("compressed", |b| b.iter(|| codec.decode(black_box(&compressed))));
    group.bench_function("json", |b| b.iter(|| codec.decode(black_box(&json_tagged))));
    group.bench_function("legacy_json", |b| b.iter(|| codec.decode(black_box(&legacy))));
    group.finish();
}

fn bench_key(c: &mut Criterion) {
    let args = KeyArgs::single("AAPL")
        .kwarg("period", "1y")
        .kwarg("interval", "1d");
    c.bench_function("key_build", |b| {
        b.iter(|| CacheKeyBuilder::build(black_box("ticker_history"), black_box(&args)))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_key);
criterion_main!(benches);
