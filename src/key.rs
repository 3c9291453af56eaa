//! Cache key derivation.
//!
//! A key is `"{category}:{digest}"` where the digest is a 128-bit BLAKE3
//! output over the canonical form of the call arguments. Keyword arguments
//! live in a `BTreeMap`, so their order never affects the key.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Digest width in bytes.
pub const DIGEST_BYTES: usize = 16;

/// Positional and keyword arguments of a memoized call.
///
/// # Example
///
/// ```
/// use market_cache::key::KeyArgs;
///
/// let args = KeyArgs::new().arg("AAPL").kwarg("period", "1y");
/// assert_eq!(args.positional().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl KeyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single positional argument, the common case for per-symbol lookups.
    pub fn single(value: impl Into<Value>) -> Self {
        Self::new().arg(value)
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument, replacing any previous value for `name`.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Canonical string fed to the digest.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&(&self.positional, &self.keyword)).unwrap_or_default()
    }
}

/// Builds cache keys from a category and call arguments.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build the key for `category` and `args`.
    ///
    /// ```
    /// use market_cache::key::{CacheKeyBuilder, KeyArgs};
    ///
    /// let a = CacheKeyBuilder::build("ticker_info", &KeyArgs::single("AAPL"));
    /// let b = CacheKeyBuilder::build("ticker_info", &KeyArgs::single("AAPL"));
    /// assert_eq!(a, b);
    /// assert!(a.starts_with("ticker_info:"));
    /// ```
    pub fn build(category: &str, args: &KeyArgs) -> String {
        format!("{}:{}", category, Self::digest(args))
    }

    /// Hex digest of the canonical argument string.
    pub fn digest(args: &KeyArgs) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(args.canonical().as_bytes());

        let mut out = [0u8; DIGEST_BYTES];
        hasher.finalize_xof().fill(&mut out);

        out.iter().fold(String::with_capacity(DIGEST_BYTES * 2), |mut hex, b| {
            let _ = write!(hex, "{:02x}", b);
            hex
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_format() {
        let key = CacheKeyBuilder::build("ticker_info", &KeyArgs::single("AAPL"));
        let (category, digest) = key.split_once(':').expect("Key has no separator");
        assert_eq!(category, "ticker_info");
        assert_eq!(digest.len(), DIGEST_BYTES * 2);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_empty_args_are_stable() {
        let a = CacheKeyBuilder::build("ticker_list", &KeyArgs::new());
        let b = CacheKeyBuilder::build("ticker_list", &KeyArgs::new());
        assert_eq!(a, b);
        assert_ne!(a, CacheKeyBuilder::build("market_summary", &KeyArgs::new()));
    }

    #[test]
    fn test_kwarg_order_is_irrelevant() {
        let a = KeyArgs::new().kwarg("period", "1y").kwarg("interval", "1d");
        let b = KeyArgs::new().kwarg("interval", "1d").kwarg("period", "1y");
        assert_eq!(
            CacheKeyBuilder::build("ticker_history", &a),
            CacheKeyBuilder::build("ticker_history", &b)
        );
    }

    #[test]
    fn test_positional_order_matters() {
        let a = KeyArgs::new().arg("AAPL").arg("MSFT");
        let b = KeyArgs::new().arg("MSFT").arg("AAPL");
        assert_ne!(CacheKeyBuilder::digest(&a), CacheKeyBuilder::digest(&b));
    }

    #[test]
    fn test_positional_and_keyword_are_distinct() {
        let a = KeyArgs::new().arg("AAPL");
        let b = KeyArgs::new().kwarg("0", "AAPL");
        assert_ne!(CacheKeyBuilder::digest(&a), CacheKeyBuilder::digest(&b));
    }

    #[test]
    fn test_value_types_are_distinct() {
        let a = KeyArgs::single(1_000_000_000_000u64);
        let b = KeyArgs::single("1000000000000");
        assert_ne!(CacheKeyBuilder::digest(&a), CacheKeyBuilder::digest(&b));
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(symbol in "[A-Z^]{1,6}", cap in any::<u64>()) {
            let args = KeyArgs::single(symbol.clone()).kwarg("market_cap", cap);
            let again = KeyArgs::single(symbol).kwarg("market_cap", cap);
            prop_assert_eq!(
                CacheKeyBuilder::build("ticker_info", &args),
                CacheKeyBuilder::build("ticker_info", &again)
            );
        }

        #[test]
        fn prop_distinct_args_give_distinct_keys(a in "[A-Z]{1,6}", b in "[A-Z]{1,6}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                CacheKeyBuilder::build("ticker_info", &KeyArgs::single(a)),
                CacheKeyBuilder::build("ticker_info", &KeyArgs::single(b))
            );
        }
    }
}
