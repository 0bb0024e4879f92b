//! Memory Driver Module
//!
//! In-process store. Expiry is tracked in a single index ordered by deadline;
//! due entries are dropped at the start of every operation and by the
//! periodic sweep, so no per-key timers exist.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::store::driver::{DriverKind, KeySelector, StoreDriver};
use crate::store::glob::{has_glob, Glob};

/// Position of an entry in the expiry index; `seq` breaks deadline ties.
type Slot = (Instant, u64);

/// Longest TTL honored; larger values are clamped to it.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 86_400);

// == Memory Entry ==
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    slot: Slot,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.slot.0
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    expiry: BTreeMap<Slot, String>,
    seq: u64,
}

impl MemoryState {
    /// Removes every entry whose deadline is at or before `now`.
    fn purge(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(next) = self.expiry.first_entry() {
            if next.key().0 > now {
                break;
            }
            let key = next.remove();
            self.entries.remove(&key);
            removed += 1;
        }
        if removed > 0 {
            debug!(removed = removed, "expired entries dropped from memory store");
        }
        removed
    }

    fn insert(&mut self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.seq += 1;
        let now = Instant::now();
        let deadline = now.checked_add(ttl).unwrap_or_else(|| now + MAX_TTL);
        let slot = (deadline, self.seq);

        // A rewrite replaces the previous deadline instead of adding a second one
        if let Some(previous) = self.entries.get(key) {
            self.expiry.remove(&previous.slot);
        }
        self.expiry.insert(slot, key.to_string());
        self.entries.insert(key.to_string(), MemoryEntry { value, slot });
    }

    fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.expiry.remove(&entry.slot);
                true
            }
            None => false,
        }
    }

    fn delete_matching(&mut self, glob: &Glob) -> usize {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| glob.is_match(key))
            .cloned()
            .collect();
        doomed.iter().filter(|key| self.delete(key)).count()
    }

    fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.expiry.clear();
        count
    }
}

// == Memory Driver ==
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        debug!("using memory for caching");
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live keys.
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.entries.keys().cloned().collect()
    }
}

#[async_trait]
impl StoreDriver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.purge(now);
        Ok(state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn get_buffer(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.purge(now);
        Ok(state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        state.insert(key, value, ttl);
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "setting new item in memory store");
        Ok(())
    }

    async fn set_multiple(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.purge(Instant::now());
        for (key, value) in entries {
            debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "setting new item in memory store");
            state.insert(&key, value, ttl);
        }
        Ok(())
    }

    async fn remove(&self, selector: &KeySelector) -> Result<usize> {
        let mut state = self.state.lock();
        state.purge(Instant::now());

        let removed = match selector {
            KeySelector::All => state.clear(),
            KeySelector::Keys(keys) => {
                let mut removed = 0;
                for key in keys {
                    if has_glob(key) {
                        removed += state.delete_matching(&Glob::new(key)?);
                    } else if state.delete(key) {
                        removed += 1;
                    }
                }
                removed
            }
        };

        debug!(selector = ?selector, removed = removed, "deleting from memory store");
        Ok(removed)
    }

    async fn purge_expired(&self) -> usize {
        self.state.lock().purge(Instant::now())
    }
}
