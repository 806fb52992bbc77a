//! Path identity tracking for the event-stream backend
//!
//! FSEvents reports "something happened at this path" with a set of flags
//! that may have been coalesced over several operations. Comparing the
//! current inode of the path against what we last saw there tells us what
//! actually happened.
//!
//! | on disk | known inode | rename flag | outcome                   |
//! |---------|-------------|-------------|---------------------------|
//! | gone    | yes         | yes         | vacated, park in the ring |
//! | gone    | yes         | no          | deleted                   |
//! | gone    | no          | yes         | remembered as last source |
//! | present | same        | -           | unchanged                 |
//! | present | different   | -           | replaced                  |
//! | present | elsewhere   | -           | moved                     |
//! | present | none        | -           | new                       |

#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

use bitflags::bitflags;
use famwatch_core::{ChangeEvent, MoveRing};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

bitflags! {
    /// Per-event flags as delivered by the stream callback
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct StreamFlags: u32 {
        const MUST_SCAN_SUBDIRS = 0x0000_0001;
        const USER_DROPPED = 0x0000_0002;
        const KERNEL_DROPPED = 0x0000_0004;
        const EVENT_IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE = 0x0000_0010;
        const ROOT_CHANGED = 0x0000_0020;
        const MOUNT = 0x0000_0040;
        const UNMOUNT = 0x0000_0080;
        const ITEM_CREATED = 0x0000_0100;
        const ITEM_REMOVED = 0x0000_0200;
        const ITEM_INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED = 0x0000_0800;
        const ITEM_MODIFIED = 0x0000_1000;
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        const ITEM_XATTR_MOD = 0x0000_8000;
        const ITEM_IS_FILE = 0x0001_0000;
        const ITEM_IS_DIR = 0x0002_0000;
        const ITEM_IS_SYMLINK = 0x0004_0000;
        const OWN_EVENT = 0x0008_0000;
    }
}

impl StreamFlags {
    /// The stream lost events below the reported path
    pub(crate) fn dropped_events(self) -> bool {
        self.intersects(Self::MUST_SCAN_SUBDIRS | Self::USER_DROPPED | Self::KERNEL_DROPPED)
    }

    fn metadata_changed(self) -> bool {
        self.intersects(
            Self::ITEM_INODE_META_MOD
                | Self::ITEM_XATTR_MOD
                | Self::ITEM_CHANGE_OWNER
                | Self::ITEM_FINDER_INFO_MOD,
        )
    }
}

/// What an event turned out to mean for the path it names
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Identity {
    /// Nothing known disappeared and nothing is there now
    Unknown,
    /// An unknown path was renamed away; it may be the source of the next arrival
    Remembered,
    /// A known inode left by rename; resolved later as a move or a delete
    Vacated,
    Deleted,
    Unchanged,
    /// Same path, different inode
    Replaced,
    /// The inode now at this path used to live at the contained path
    Moved(PathBuf),
    New,
}

/// Events to report, plus whether a new directory needs its contents seeded
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub(crate) events: Vec<ChangeEvent>,
    pub(crate) seed_dir: bool,
}

/// Bidirectional path ↔ inode map with rename pairing
#[derive(Debug)]
pub(crate) struct IdentityTracker {
    path_inode: HashMap<PathBuf, u64>,
    inode_path: HashMap<u64, PathBuf>,
    /// Most recent unknown path seen leaving by rename
    last_src: Option<PathBuf>,
    ring: MoveRing,
}

impl IdentityTracker {
    pub(crate) fn new(bucket_millis: u64) -> Self {
        Self {
            path_inode: HashMap::new(),
            inode_path: HashMap::new(),
            last_src: None,
            ring: MoveRing::new(bucket_millis),
        }
    }

    /// Record `path` without reporting it; returns true if it was not known
    pub(crate) fn seed(&mut self, path: &Path, inode: u64) -> bool {
        let fresh = self.path_inode.get(path) != Some(&inode);
        self.record(path, inode);
        fresh
    }

    pub(crate) fn inode_of(&self, path: &Path) -> Option<u64> {
        self.path_inode.get(path).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.path_inode.len()
    }

    /// Classify one stream event
    ///
    /// `inode` is the inode currently at `path`, or `None` if nothing is.
    pub(crate) fn classify(
        &mut self,
        path: &Path,
        inode: Option<u64>,
        flags: StreamFlags,
        now_ms: u64,
    ) -> Identity {
        let known = self.inode_of(path);
        match inode {
            Some(inode) => self.classify_present(path, inode, known, flags, now_ms),
            None => self.classify_gone(path, known, flags, now_ms),
        }
    }

    fn classify_gone(
        &mut self,
        path: &Path,
        known: Option<u64>,
        flags: StreamFlags,
        now_ms: u64,
    ) -> Identity {
        let renamed = flags.contains(StreamFlags::ITEM_RENAMED);
        match known {
            Some(inode) => {
                self.forget(path, inode);
                if renamed {
                    self.ring.insert(inode, path.to_path_buf(), now_ms);
                    Identity::Vacated
                } else {
                    Identity::Deleted
                }
            }
            None if renamed => {
                self.last_src = Some(path.to_path_buf());
                Identity::Remembered
            }
            None => Identity::Unknown,
        }
    }

    fn classify_present(
        &mut self,
        path: &Path,
        inode: u64,
        mut known: Option<u64>,
        flags: StreamFlags,
        now_ms: u64,
    ) -> Identity {
        let mut origin = None;
        if flags.contains(StreamFlags::ITEM_RENAMED) {
            origin = self.ring.take(inode, now_ms).or_else(|| self.last_src.take());
            if origin.is_some() {
                known = Some(inode);
            }
        }
        let origin = origin
            .or_else(|| self.inode_path.get(&inode).cloned())
            .or_else(|| known.map(|_| path.to_path_buf()));

        match origin {
            Some(origin) if origin == path => {
                if known == Some(inode) {
                    return Identity::Unchanged;
                }
                if let Some(old) = known {
                    self.inode_path.remove(&old);
                }
                self.record(path, inode);
                Identity::Replaced
            }
            Some(origin) if known == Some(inode) => {
                self.path_inode.remove(&origin);
                self.rewrite_prefix(&origin, path);
                self.record(path, inode);
                Identity::Moved(origin)
            }
            other => {
                if let Some(stale) = other {
                    self.path_inode.remove(&stale);
                }
                if let Some(old) = known {
                    self.inode_path.remove(&old);
                }
                self.record(path, inode);
                Identity::New
            }
        }
    }

    /// Turn a classification into the events to report
    pub(crate) fn outcome(path: &Path, flags: StreamFlags, identity: Identity) -> Outcome {
        let is_dir = flags.contains(StreamFlags::ITEM_IS_DIR);
        let mut out = Outcome::default();

        match identity {
            Identity::Unknown | Identity::Remembered | Identity::Vacated => {}
            Identity::Deleted => out.events.push(ChangeEvent::deleted(path)),
            Identity::Moved(origin) => out.events.push(ChangeEvent::moved(origin, path)),
            Identity::Unchanged => {
                if flags.contains(StreamFlags::ITEM_MODIFIED) && !is_dir {
                    out.events.push(ChangeEvent::modified(path));
                } else if flags.metadata_changed() {
                    out.events.push(ChangeEvent::attribute_changed(path));
                }
            }
            Identity::Replaced if !is_dir => out.events.push(ChangeEvent::modified(path)),
            Identity::Replaced | Identity::New => {
                out.events.push(ChangeEvent::created(path));
                if is_dir {
                    out.seed_dir = true;
                } else if !flags.contains(StreamFlags::ITEM_CREATED)
                    || flags.contains(StreamFlags::ITEM_MODIFIED)
                {
                    out.events.push(ChangeEvent::modified(path));
                }
            }
        }
        out
    }

    /// Vacated paths nobody claimed in time; they left the tree
    pub(crate) fn expire(&mut self, now_ms: u64) -> Vec<PathBuf> {
        let expired = self.ring.expire(now_ms);
        for path in &expired {
            self.forget_prefix(path);
        }
        expired
    }

    pub(crate) fn pending_moves(&self) -> usize {
        self.ring.pending()
    }

    fn record(&mut self, path: &Path, inode: u64) {
        if let Some(previous) = self.inode_path.insert(inode, path.to_path_buf()) {
            if previous != path && self.path_inode.get(&previous) == Some(&inode) {
                self.path_inode.remove(&previous);
            }
        }
        self.path_inode.insert(path.to_path_buf(), inode);
    }

    fn forget(&mut self, path: &Path, inode: u64) {
        self.path_inode.remove(path);
        if self.inode_path.get(&inode).map(PathBuf::as_path) == Some(path) {
            self.inode_path.remove(&inode);
        }
    }

    /// Drop every entry strictly below `prefix`
    fn forget_prefix(&mut self, prefix: &Path) {
        let below: Vec<(PathBuf, u64)> = self
            .path_inode
            .iter()
            .filter(|(p, _)| p.as_path() != prefix && p.starts_with(prefix))
            .map(|(p, i)| (p.clone(), *i))
            .collect();
        for (path, inode) in below {
            self.forget(&path, inode);
        }
    }

    /// Move every entry strictly below `from` to the same place below `to`
    fn rewrite_prefix(&mut self, from: &Path, to: &Path) {
        let below: Vec<(PathBuf, u64)> = self
            .path_inode
            .iter()
            .filter(|(p, _)| p.as_path() != from && p.starts_with(from))
            .map(|(p, i)| (p.clone(), *i))
            .collect();
        for (old, inode) in below {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = to.join(rest);
            self.path_inode.remove(&old);
            self.inode_path.insert(inode, new.clone());
            self.path_inode.insert(new, inode);
        }
    }
}
