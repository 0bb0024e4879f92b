//! Expiration Policy Module
//!
//! Decides the TTL of the next write for a key, including the adaptive
//! "increasing" mode where TTLs grow with hit counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::policy::route::Timeout;

/// Hit counters are discarded wholesale on this interval.
pub const COUNTER_RESET_INTERVAL: Duration = Duration::from_secs(60);

/// Hit count -> TTL (ms) used when no table is configured.
pub const DEFAULT_THRESHOLDS: [(u64, u64); 5] = [
    (1, 5_000),
    (3, 15_000),
    (10, 30_000),
    (20, 60_000),
    (50, 120_000),
];

// == Thresholds ==
/// Ascending hit-count thresholds and the TTL each one assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    steps: Vec<(u64, u64)>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            steps: DEFAULT_THRESHOLDS.to_vec(),
        }
    }
}

impl Thresholds {
    /// Parses a `count -> ttl` table, dropping malformed entries.
    ///
    /// Falls back to [`DEFAULT_THRESHOLDS`] when no table is given or nothing
    /// in it survives parsing.
    pub fn from_config(table: Option<&Map<String, Value>>) -> Self {
        let Some(table) = table else {
            return Self::default();
        };

        let mut steps: Vec<(u64, u64)> = table
            .iter()
            .filter_map(|(count, ttl)| {
                let parsed = count
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .zip(parse_duration_ms(ttl));
                if parsed.is_none() {
                    warn!(count = %count, value = %ttl, "increasing timeout value invalid, dropping");
                }
                parsed
            })
            .collect();

        if steps.is_empty() {
            warn!("no usable increasing thresholds, using defaults");
            return Self::default();
        }

        steps.sort_unstable_by_key(|(count, _)| *count);
        steps.dedup_by_key(|(count, _)| *count);
        Self { steps }
    }

    /// TTL of the smallest threshold.
    pub fn first(&self) -> u64 {
        self.steps
            .first()
            .map(|(_, ttl)| *ttl)
            .unwrap_or(DEFAULT_THRESHOLDS[0].1)
    }

    /// TTL of the threshold equal to `count`, if there is one.
    pub fn at(&self, count: u64) -> Option<u64> {
        self.steps
            .binary_search_by_key(&count, |(c, _)| *c)
            .ok()
            .map(|i| self.steps[i].1)
    }

    pub fn steps(&self) -> &[(u64, u64)] {
        &self.steps
    }
}

/// Parses a TTL given as milliseconds or as `<digits><s|m|h|d>`.
pub fn parse_duration_ms(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            let unit = s.chars().last()?;
            let digits = &s[..s.len() - unit.len_utf8()];
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let multiplier = match unit {
                's' => 1_000,
                'm' => 60_000,
                'h' => 3_600_000,
                'd' => 86_400_000,
                _ => return None,
            };
            digits.parse::<u64>().ok()?.checked_mul(multiplier)
        }
        _ => None,
    }
}

// == Hit Counter ==
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    count: u64,
    /// TTL decided at the last observation
    ttl_ms: Option<u64>,
}

/// Per-key observation counts for the current window.
#[derive(Debug, Default)]
pub struct HitCounter {
    counts: Mutex<HashMap<String, Tally>>,
}

impl HitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation and returns the key's new count.
    pub fn observe(&self, key: &str) -> u64 {
        let mut counts = self.counts.lock();
        let tally = counts.entry(key.to_string()).or_default();
        tally.count += 1;
        tally.count
    }

    /// Records an observation and decides the key's TTL from `thresholds`.
    ///
    /// Returns the new count and TTL. Counts between thresholds keep the TTL
    /// decided at the previous observation.
    pub fn advance(&self, key: &str, thresholds: &Thresholds) -> (u64, u64) {
        let mut counts = self.counts.lock();
        let tally = counts.entry(key.to_string()).or_default();
        tally.count += 1;

        let ttl = if tally.count == 1 {
            thresholds.first()
        } else {
            thresholds
                .at(tally.count)
                .or(tally.ttl_ms)
                .unwrap_or_else(|| thresholds.first())
        };
        tally.ttl_ms = Some(ttl);
        (tally.count, ttl)
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts.lock().get(key).map_or(0, |tally| tally.count)
    }

    /// Replaces the whole map; every key starts cold afterwards.
    pub fn reset(&self) {
        *self.counts.lock() = HashMap::new();
    }
}

// == Expiration Table ==
/// Table size below which assignments never trigger a prune.
const MIN_HIGH_WATER: usize = 256;

/// Staleness deadline for TTLs too large to add to an instant.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 86_400);

#[derive(Debug, Clone, Copy)]
struct Assigned {
    ttl_ms: u64,
    /// Past this instant any entry written with the TTL has expired too
    stale_at: Instant,
}

#[derive(Debug)]
struct TableState {
    ttls: HashMap<String, Assigned>,
    high_water: usize,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            ttls: HashMap::new(),
            high_water: MIN_HIGH_WATER,
        }
    }
}

impl TableState {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.ttls.len();
        self.ttls.retain(|_, assigned| assigned.stale_at > now);
        before - self.ttls.len()
    }
}

/// TTL (ms) to apply to the next write of each base key.
///
/// An entry becomes stale once its own TTL has elapsed since assignment.
/// Stale entries are dropped by [`ExpirationTable::purge`] and, whenever the
/// table doubles past its last size, by [`ExpirationTable::assign`].
#[derive(Debug, Default)]
pub struct ExpirationTable {
    state: Mutex<TableState>,
}

impl ExpirationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, key: &str, ttl_ms: u64) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.ttls.insert(
            key.to_string(),
            Assigned {
                ttl_ms,
                stale_at: now
                    .checked_add(Duration::from_millis(ttl_ms))
                    .unwrap_or_else(|| now + FAR_FUTURE),
            },
        );

        if state.ttls.len() > state.high_water {
            let removed = state.purge(now);
            state.high_water = (state.ttls.len() * 2).max(MIN_HIGH_WATER);
            debug!(removed = removed, tracked = state.ttls.len(), "stale TTL assignments dropped");
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.state.lock().ttls.get(key).map(|assigned| assigned.ttl_ms)
    }

    /// Drops assignments whose TTL has elapsed and returns how many.
    pub fn purge(&self) -> usize {
        self.state.lock().purge(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.state.lock().ttls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().ttls.clear();
    }
}

// == Expiration Policy ==
/// Computes write TTLs from route timeouts.
#[derive(Debug)]
pub struct ExpirationPolicy {
    default_ttl_ms: u64,
    thresholds: Thresholds,
    /// Allocated only when some route is `"increasing"`
    counter: Option<Arc<HitCounter>>,
}

impl ExpirationPolicy {
    pub fn new(default_ttl_ms: u64, thresholds: Thresholds, track_hits: bool) -> Self {
        Self {
            default_ttl_ms,
            thresholds,
            counter: track_hits.then(|| Arc::new(HitCounter::new())),
        }
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    /// Shared handle to the hit counter, for the reset task.
    pub fn counter(&self) -> Option<Arc<HitCounter>> {
        self.counter.clone()
    }

    /// Records one observation of `key` and assigns the TTL of its next
    /// write in `table`. Returns `None` when the route must not be cached.
    ///
    /// The assigned TTL only affects future writes; entries already stored
    /// keep the expiry they were written with.
    pub fn evaluate(&self, timeout: Timeout, key: &str, table: &ExpirationTable) -> Option<u64> {
        let ttl = match timeout {
            Timeout::Disabled => return None,
            Timeout::Default => self.default_ttl_ms,
            Timeout::Fixed(ms) => ms,
            Timeout::Increasing => match &self.counter {
                Some(counter) => {
                    let (count, ttl) = counter.advance(key, &self.thresholds);
                    debug!(key = key, count = count, ttl_ms = ttl, "increasing timeout");
                    ttl
                }
                None => self.default_ttl_ms,
            },
        };

        table.assign(key, ttl);
        Some(ttl)
    }

    /// Discards all hit counts.
    pub fn reset(&self) {
        if let Some(counter) = &self.counter {
            counter.reset();
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn increasing() -> ExpirationPolicy {
        ExpirationPolicy::new(5000, Thresholds::default(), true)
    }

    #[test]
    fn test_default_sequence() {
        let policy = increasing();
        let table = ExpirationTable::new();

        let ttls: Vec<u64> = (0..4)
            .map(|_| policy.evaluate(Timeout::Increasing, "/k", &table).unwrap())
            .collect();
        assert_eq!(ttls, vec![5000, 5000, 15000, 15000]);
    }

    #[test]
    fn test_thresholds_advance_only_on_exact_counts() {
        let policy = increasing();
        let table = ExpirationTable::new();

        let mut last = 0;
        for count in 1..=50u64 {
            last = policy.evaluate(Timeout::Increasing, "/k", &table).unwrap();
            match count {
                10 => assert_eq!(last, 30_000),
                19 => assert_eq!(last, 30_000),
                20 => assert_eq!(last, 60_000),
                _ => {}
            }
        }
        assert_eq!(last, 120_000);
        assert_eq!(table.get("/k"), Some(120_000));
    }

    #[test]
    fn test_keys_count_independently() {
        let policy = increasing();
        let table = ExpirationTable::new();

        for _ in 0..3 {
            policy.evaluate(Timeout::Increasing, "/hot", &table);
        }
        assert_eq!(policy.evaluate(Timeout::Increasing, "/cold", &table), Some(5000));
        assert_eq!(table.get("/hot"), Some(15000));
    }

    #[test]
    fn test_reset_starts_cold() {
        let policy = increasing();
        let table = ExpirationTable::new();

        for _ in 0..3 {
            policy.evaluate(Timeout::Increasing, "/k", &table);
        }
        policy.reset();

        assert_eq!(policy.counter().unwrap().count("/k"), 0);
        assert_eq!(policy.evaluate(Timeout::Increasing, "/k", &table), Some(5000));
    }

    #[test]
    fn test_reset_forgets_previous_ttl() {
        let policy = increasing();
        let table = ExpirationTable::new();

        for _ in 0..3 {
            policy.evaluate(Timeout::Increasing, "/k", &table);
        }
        policy.reset();

        assert_eq!(policy.evaluate(Timeout::Increasing, "/k", &table), Some(5000));
        assert_eq!(policy.evaluate(Timeout::Increasing, "/k", &table), Some(5000));
    }

    #[tokio::test]
    async fn test_table_drops_assignments_once_their_ttl_elapses() {
        let table = ExpirationTable::new();
        for i in 0..1000 {
            table.assign(&format!("/s?n={}", i), 50);
        }
        table.assign("/long", 60_000);
        assert_eq!(table.len(), 1001);

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(table.purge(), 1000);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("/long"), Some(60_000));
    }

    #[test]
    fn test_assign_accepts_huge_ttl() {
        let table = ExpirationTable::new();
        table.assign("/forever", u64::MAX);
        assert_eq!(table.purge(), 0);
        assert_eq!(table.get("/forever"), Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_assign_prunes_stale_entries_past_high_water() {
        let table = ExpirationTable::new();
        for i in 0..MIN_HIGH_WATER {
            table.assign(&format!("/k{}", i), 20);
        }
        assert_eq!(table.len(), MIN_HIGH_WATER);

        tokio::time::sleep(Duration::from_millis(60)).await;
        table.assign("/fresh", 60_000);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("/fresh"), Some(60_000));
    }

    #[test]
    fn test_fixed_default_and_disabled() {
        let policy = ExpirationPolicy::new(7000, Thresholds::default(), false);
        let table = ExpirationTable::new();

        assert_eq!(policy.evaluate(Timeout::Disabled, "/a", &table), None);
        assert_eq!(table.get("/a"), None);
        assert_eq!(policy.evaluate(Timeout::Default, "/b", &table), Some(7000));
        assert_eq!(policy.evaluate(Timeout::Fixed(250), "/c", &table), Some(250));
        assert_eq!(table.get("/c"), Some(250));
        assert!(policy.counter().is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_ms(&json!(1500)), Some(1500));
        assert_eq!(parse_duration_ms(&json!("30s")), Some(30_000));
        assert_eq!(parse_duration_ms(&json!("2m")), Some(120_000));
        assert_eq!(parse_duration_ms(&json!("1h")), Some(3_600_000));
        assert_eq!(parse_duration_ms(&json!("1d")), Some(86_400_000));
        assert_eq!(parse_duration_ms(&json!("10w")), None);
        assert_eq!(parse_duration_ms(&json!("s")), None);
        assert_eq!(parse_duration_ms(&json!("1.5s")), None);
        assert_eq!(parse_duration_ms(&json!(true)), None);
    }

    #[test]
    fn test_thresholds_from_config() {
        let table = json!({ "5": "1m", "1": 1000, "2": "bogus", "x": 10 });
        let thresholds = Thresholds::from_config(table.as_object());

        assert_eq!(thresholds.steps(), &[(1, 1000), (5, 60_000)]);
        assert_eq!(thresholds.first(), 1000);
        assert_eq!(thresholds.at(5), Some(60_000));
        assert_eq!(thresholds.at(2), None);
    }

    #[test]
    fn test_thresholds_fallback_to_defaults() {
        assert_eq!(Thresholds::from_config(None), Thresholds::default());

        let table = json!({ "1": "soon" });
        assert_eq!(Thresholds::from_config(table.as_object()), Thresholds::default());
    }
}
