//! Time-bucketed ring of pending move departures
//!
//! The stream backend cannot tell "renamed within the tree" from "renamed
//! out of the tree" when the vacate half arrives. Vacated entries go into
//! the bucket for the current time slice; an arrival may claim them from
//! the current or the previous slice; anything older than two slices is
//! handed back by [`MoveRing::expire`] to be reported as deleted.
//!
//! ```text
//!  slice:   e-2        e-1        e        e+1
//!          [expire]  [claimable] [insert]  [idle]
//! ```

use std::path::PathBuf;

/// Number of buckets in the ring
pub const RING_BUCKETS: usize = 4;

#[derive(Debug, Default)]
struct Bucket {
    /// Time slice this bucket currently represents
    epoch: Option<u64>,
    /// inode → vacated path, in insertion order
    entries: Vec<(u64, PathBuf)>,
}

/// Ring of [`RING_BUCKETS`] time-sliced buckets
#[derive(Debug)]
pub struct MoveRing {
    bucket_millis: u64,
    buckets: [Bucket; RING_BUCKETS],
    /// Entries evicted by slice reuse before the cleaner reached them
    overdue: Vec<PathBuf>,
}

impl MoveRing {
    pub fn new(bucket_millis: u64) -> Self {
        Self {
            bucket_millis: bucket_millis.max(1),
            buckets: Default::default(),
            overdue: Vec::new(),
        }
    }

    fn epoch(&self, now_ms: u64) -> u64 {
        now_ms / self.bucket_millis
    }

    fn slot(epoch: u64) -> usize {
        (epoch % RING_BUCKETS as u64) as usize
    }

    /// Park a vacated path under its inode in the current slice
    pub fn insert(&mut self, inode: u64, path: PathBuf, now_ms: u64) {
        let epoch = self.epoch(now_ms);
        let bucket = &mut self.buckets[Self::slot(epoch)];

        if bucket.epoch != Some(epoch) {
            // Slot reused: whatever is left from four slices ago is long expired
            self.overdue
                .extend(bucket.entries.drain(..).map(|(_, p)| p));
            bucket.epoch = Some(epoch);
        }

        bucket.entries.retain(|(i, _)| *i != inode);
        bucket.entries.push((inode, path));
    }

    /// Claim a vacated path from the current or previous slice
    pub fn take(&mut self, inode: u64, now_ms: u64) -> Option<PathBuf> {
        let epoch = self.epoch(now_ms);
        let candidates = [Some(epoch), epoch.checked_sub(1)];

        for e in candidates.into_iter().flatten() {
            let bucket = &mut self.buckets[Self::slot(e)];
            if bucket.epoch != Some(e) {
                continue;
            }
            if let Some(pos) = bucket.entries.iter().position(|(i, _)| *i == inode) {
                return Some(bucket.entries.remove(pos).1);
            }
        }
        None
    }

    /// Remove and return every path at least two slices old, oldest first
    pub fn expire(&mut self, now_ms: u64) -> Vec<PathBuf> {
        let epoch = self.epoch(now_ms);
        let mut expired: Vec<PathBuf> = self.overdue.drain(..).collect();

        let mut stale: Vec<usize> = (0..RING_BUCKETS)
            .filter(|&i| matches!(self.buckets[i].epoch, Some(e) if e + 2 <= epoch))
            .collect();
        stale.sort_by_key(|&i| self.buckets[i].epoch);

        for i in stale {
            let bucket = &mut self.buckets[i];
            expired.extend(bucket.entries.drain(..).map(|(_, p)| p));
            bucket.epoch = None;
        }
        expired
    }

    /// Number of departures still waiting for a partner
    pub fn pending(&self) -> usize {
        self.overdue.len() + self.buckets.iter().map(|b| b.entries.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
