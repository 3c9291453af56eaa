//! Cache strategies for memoized calls.

use std::fmt;

/// How a memoized call treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Serve a stored entry if present, otherwise produce and store.
    #[default]
    Refresh,
    /// Delete the stored entry, then produce and store.
    Invalidate,
    /// Skip the lookup, produce, and still store the result for later callers.
    Bypass,
}

impl CacheStrategy {
    pub(crate) fn reads_cache(&self) -> bool {
        matches!(self, CacheStrategy::Refresh)
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::Refresh => write!(f, "Refresh"),
            CacheStrategy::Invalidate => write!(f, "Invalidate"),
            CacheStrategy::Bypass => write!(f, "Bypass"),
        }
    }
}
