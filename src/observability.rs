//! Metrics hook for memoized calls.

use std::time::Duration;

/// Receives memoizer events. All methods default to no-ops, so
/// implementations only override what they export.
pub trait CacheMetrics: Send + Sync {
    fn record_hit(&self, _key: &str, _duration: Duration) {}

    fn record_miss(&self, _key: &str, _duration: Duration) {}

    /// A stored entry could not be decoded and was deleted.
    fn record_corruption(&self, _key: &str) {}

    /// Store I/O failed during a lookup or write.
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Default metrics sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {}
