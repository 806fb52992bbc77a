//! Error types for monitor setup and operation

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while starting or running a monitor
#[derive(Debug, Error)]
pub enum WatchError {
    /// A backend thread could not be created
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The native notification source could not be opened
    #[error("failed to open notification source: {0}")]
    SourceOpen(#[source] io::Error),

    /// A directory could not be registered for notifications
    #[error("failed to watch '{}': {source}", path.display())]
    Registration {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backend quit before it finished its initial scan
    #[error("monitor for '{}' failed to initialize", .0.display())]
    InitFailed(PathBuf),

    /// No backend exists for this target
    #[error("unsupported platform: {0}")]
    Unsupported(&'static str),

    /// Invalid or unreadable configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WatchError {
    /// Wrap an I/O error raised while registering `path`
    pub fn registration(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WatchError::Registration {
            path: path.into(),
            source,
        }
    }

    /// True if the error only means the path disappeared before we got to it
    pub fn is_vanished(&self) -> bool {
        match self {
            WatchError::Registration { source, .. } | WatchError::Io(source) => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, WatchError>;
