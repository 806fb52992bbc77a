//! Recursive directory monitoring for famwatch
//!
//! This crate turns the native notification source of each platform into
//! one stream of [`ChangeEvent`]s:
//! - inotify on Linux, with cookie-based rename pairing
//! - FSEvents on macOS, with inode-based rename pairing
//! - `ReadDirectoryChangesW` on Windows, with adjacent-record pairing
//!
//! A move whose partner never shows up inside the watched tree is reported
//! as a deletion once its grace window expires.

mod handler;
mod monitor;
mod platform;
mod shared;
mod thread;

#[cfg(any(target_os = "macos", test))]
mod identity;
#[cfg(any(windows, test))]
mod notify_records;

pub use handler::EventHandler;
pub use monitor::{Monitor, QuitHandle};

// Re-exports
pub use famwatch_core::{ChangeEvent, EventKind, MonitorConfig, Result, WatchError};
