//! Per-key request coalescing.
//!
//! Callers that miss on the same key queue on one [`Flight`]. The first one
//! runs its producer and leaves the result in the flight; the rest pick it
//! up instead of calling their own producer. A failed or cancelled producer
//! leaves the slot empty, so the next caller in line runs its own.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub(crate) struct Flight {
    pub(crate) result: Mutex<Option<Value>>,
}

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    calls: DashMap<String, Arc<Flight>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Flight for `key`, created if no call is in progress.
    pub(crate) fn join(&self, key: &str) -> Arc<Flight> {
        self.calls
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Flight::default()))
            .clone()
    }

    /// Forget the flight once a caller is done with it. A newer flight
    /// registered under the same key is left alone.
    pub(crate) fn finish(&self, key: &str, flight: &Arc<Flight>) {
        self.calls.remove_if(key, |_, current| Arc::ptr_eq(current, flight));
    }

    /// Join the flight for `key` until the returned guard is dropped.
    pub(crate) fn enter(&self, key: &str) -> FlightGuard<'_> {
        FlightGuard {
            flights: self,
            key: key.to_string(),
            flight: self.join(key),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Membership in a flight. Dropping it, on completion or when the caller's
/// future is cancelled, releases the map entry.
pub(crate) struct FlightGuard<'a> {
    flights: &'a InFlight,
    key: String,
    flight: Arc<Flight>,
}

impl FlightGuard<'_> {
    pub(crate) fn flight(&self) -> &Flight {
        &self.flight
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flights.finish(&self.key, &self.flight);
    }
}
