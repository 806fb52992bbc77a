//! Directory change records and their translation to events
//!
//! A completed directory read fills the buffer with variable-length
//! records, each aligned to four bytes:
//!
//! ```text
//! offset  size  field
//!      0     4  next entry offset (0 on the last record)
//!      4     4  action
//!      8     4  name length in bytes
//!     12     n  name, UTF-16LE, relative to the watched directory
//! ```

#![cfg_attr(not(windows), allow(dead_code))]

use famwatch_core::ChangeEvent;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

pub(crate) const FILE_ACTION_ADDED: u32 = 1;
pub(crate) const FILE_ACTION_REMOVED: u32 = 2;
pub(crate) const FILE_ACTION_MODIFIED: u32 = 3;
pub(crate) const FILE_ACTION_RENAMED_OLD_NAME: u32 = 4;
pub(crate) const FILE_ACTION_RENAMED_NEW_NAME: u32 = 5;

const HEADER_LEN: usize = 12;

/// Longest name that can be an 8.3 short name
const SHORT_NAME_MAX: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NotifyRecord {
    pub(crate) action: u32,
    /// Relative name as reported, with `\` separators
    pub(crate) name: String,
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode every record in `buf`, stopping at the first malformed one
pub(crate) fn decode_records(buf: &[u8]) -> Vec<NotifyRecord> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    loop {
        let (Some(next), Some(action), Some(name_len)) = (
            read_u32(buf, offset),
            read_u32(buf, offset + 4),
            read_u32(buf, offset + 8),
        ) else {
            if offset < buf.len() {
                warn!("Truncated change record at offset {}", offset);
            }
            break;
        };

        let start = offset + HEADER_LEN;
        let Some(raw) = buf.get(start..start + name_len as usize) else {
            warn!("Change record name overruns buffer at offset {}", offset);
            break;
        };
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        records.push(NotifyRecord {
            action,
            name: String::from_utf16_lossy(&units),
        });

        if next == 0 {
            break;
        }
        offset += next as usize;
    }
    records
}

/// Filesystem queries the translator needs
pub(crate) trait PathResolver {
    fn is_dir(&self, path: &Path) -> bool;

    /// Long form of a path whose last component may be an 8.3 short name
    fn expand_short_name(&self, path: &Path) -> Option<PathBuf>;
}

/// Join a reported relative name onto the watched root
pub(crate) fn join_relative(root: &Path, name: &str) -> PathBuf {
    name.split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

fn may_be_short_name(name: &str) -> bool {
    let last = name.rsplit(['\\', '/']).next().unwrap_or(name);
    last.chars().count() <= SHORT_NAME_MAX && last.contains('~')
}

/// Turns records into events, pairing old and new rename halves
///
/// A held old name carries over from one buffer to the next.
#[derive(Debug)]
pub(crate) struct RecordTranslator {
    root: PathBuf,
    held_old_name: Option<PathBuf>,
}

impl RecordTranslator {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            held_old_name: None,
        }
    }

    pub(crate) fn translate(
        &mut self,
        record: &NotifyRecord,
        resolver: &impl PathResolver,
    ) -> Vec<ChangeEvent> {
        let mut path = join_relative(&self.root, &record.name);
        if may_be_short_name(&record.name) {
            if let Some(long) = resolver.expand_short_name(&path) {
                trace!("Expanded {} to {}", path.display(), long.display());
                path = long;
            }
        }

        let mut events = Vec::new();

        if record.action == FILE_ACTION_RENAMED_NEW_NAME {
            match self.held_old_name.take() {
                Some(old) => events.push(ChangeEvent::moved(old, path)),
                None => events.push(ChangeEvent::created(path)),
            }
            return events;
        }

        // Anything but the new name means the held old name left the tree
        if let Some(old) = self.held_old_name.take() {
            events.push(ChangeEvent::deleted(old));
        }

        match record.action {
            FILE_ACTION_ADDED => events.push(ChangeEvent::created(path)),
            FILE_ACTION_REMOVED => events.push(ChangeEvent::deleted(path)),
            FILE_ACTION_MODIFIED => {
                if resolver.is_dir(&path) {
                    events.push(ChangeEvent::attribute_changed(path));
                } else {
                    events.push(ChangeEvent::modified(path));
                }
            }
            FILE_ACTION_RENAMED_OLD_NAME => self.held_old_name = Some(path),
            other => trace!("Ignoring change record with action {}", other),
        }
        events
    }
}
