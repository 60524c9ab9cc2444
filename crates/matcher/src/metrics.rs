// Metrics hooks for the `matcher` crate.
//
// A `MatchingService` takes an optional `MatchMetrics` implementation at
// construction and reports per-probe latency, hit counts, and the path that
// produced them. This keeps instrumentation decoupled from any specific
// metrics backend and avoids process-wide state.
use std::time::Duration;

use crate::types::MatchPath;

/// Metrics observer for match operations.
pub trait MatchMetrics: Send + Sync {
    /// Record the outcome of one probe.
    ///
    /// `path` says whether the cached index or brute force produced the
    /// results; `hit_count` is the number of accepted matches.
    fn record_match(&self, event_id: &str, path: MatchPath, latency: Duration, hit_count: usize);

    /// Called when the index could not serve a probe and brute force ran instead.
    fn record_fallback(&self, _event_id: &str, _reason: &str) {}
}
