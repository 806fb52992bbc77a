//! Rename correlation table
//!
//! Native facilities report a move as two separate halves. The departure
//! half is parked here under its correlation token (inotify cookie, inode)
//! until the arrival half claims it, or until it ages out and is reported
//! as a delete.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;

/// A parked move departure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    /// Path the object left
    pub origin: PathBuf,
    /// Monotonic insert time in milliseconds
    pub inserted_at_ms: u64,
}

/// Pending move departures keyed by correlation token
#[derive(Debug)]
pub struct CorrelationTable<K> {
    entries: HashMap<K, CorrelationEntry>,
}

impl<K: Hash + Eq + Clone> CorrelationTable<K> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Park a departure
    ///
    /// Returns the entry previously stored under `key`, if any.
    pub fn insert(&mut self, key: K, origin: PathBuf, now_ms: u64) -> Option<CorrelationEntry> {
        self.entries.insert(
            key,
            CorrelationEntry {
                origin,
                inserted_at_ms: now_ms,
            },
        )
    }

    /// Claim the departure matching `key`
    pub fn take(&mut self, key: &K) -> Option<CorrelationEntry> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove and return every entry strictly older than `grace_ms`
    ///
    /// Expired entries come back oldest first so the resulting deletes are
    /// reported in the order the departures happened.
    pub fn sweep(&mut self, now_ms: u64, grace_ms: u64) -> Vec<(K, CorrelationEntry)> {
        let cutoff = now_ms.saturating_sub(grace_ms);
        if self.entries.values().all(|e| e.inserted_at_ms >= cutoff) {
            return Vec::new();
        }

        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at_ms < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        let mut expired: Vec<(K, CorrelationEntry)> = expired_keys
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e)))
            .collect();
        expired.sort_by_key(|(_, e)| e.inserted_at_ms);
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Default for CorrelationTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
