//! Cache Statistics Module
//!
//! Counts request outcomes and store writes.

use serde::Serialize;

// == Cache Stats ==
/// Request outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Responses served from the store
    pub hits: u64,
    /// Cacheable requests forwarded to the origin
    pub misses: u64,
    /// Requests that skipped caching (no route, veto, no-cache, non-GET)
    pub bypassed: u64,
    /// Entries written after a miss
    pub writes: u64,
    /// Invalidations triggered by non-GET requests or `clear`
    pub invalidations: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no cacheable requests have
    /// been seen. Bypassed requests do not count.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_bypass(&mut self) {
        self.bypassed += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }
}
