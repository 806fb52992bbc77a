//! Change events delivered to monitor callbacks

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Type of file system change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// File or directory created (or moved in from outside the root)
    Created,
    /// File content modified
    Modified,
    /// File or directory deleted (or moved out of the root)
    Deleted,
    /// File or directory renamed within the watched tree
    Moved,
    /// Metadata changed (permissions, timestamps, ownership)
    AttributeChanged,
}

impl EventKind {
    /// Stable lowercase name used in logs and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Moved => "moved",
            EventKind::AttributeChanged => "attrib",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized change event
///
/// Ownership passes to the callback that receives it. `dest` is only set
/// for [`EventKind::Moved`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Type of change
    pub kind: EventKind,
    /// Path the change applies to (the origin for moves)
    pub source: PathBuf,
    /// Destination path for moves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, source: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: source.into(),
            dest: None,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Deleted, path)
    }

    pub fn attribute_changed(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::AttributeChanged, path)
    }

    /// Rename from `source` to `dest`
    pub fn moved(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Moved,
            source: source.into(),
            dest: Some(dest.into()),
        }
    }

    /// The path an observer should look at after the change
    ///
    /// For moves this is the destination, otherwise the source.
    pub fn current_path(&self) -> &Path {
        self.dest.as_deref().unwrap_or(&self.source)
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dest {
            Some(dest) => write!(
                f,
                "famEvent type: {} file: [{}] dest: [{}]",
                self.kind,
                self.source.display(),
                dest.display()
            ),
            None => write!(
                f,
                "famEvent type: {} file: [{}]",
                self.kind,
                self.source.display()
            ),
        }
    }
}
