//! Platform-specific backends
//!
//! Each backend spawns its own threads in [`Backend::start`] and returns
//! immediately; it reports readiness through the shared `initialized` flag
//! and failure through the shared `quit` flag.

use crate::shared::Shared;
use famwatch_core::{Clock, MonitorConfig, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(windows)]
mod windows;

/// Everything a backend needs from the monitor that owns it
pub(crate) struct BackendContext {
    pub(crate) root: PathBuf,
    pub(crate) name: String,
    pub(crate) config: MonitorConfig,
    pub(crate) shared: Arc<Shared>,
    pub(crate) clock: Clock,
}

pub(crate) trait Backend: Sized + Send {
    /// Spawn the backend threads for `ctx.root`
    fn start(ctx: BackendContext) -> Result<Self>;

    /// Interrupt blocking waits and join threads, waiting at most `timeout`
    /// for each. The shared quit flag is already set when this runs.
    fn shutdown(&mut self, timeout: Duration);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type PlatformBackend = linux::InotifyBackend;

#[cfg(target_os = "macos")]
pub(crate) type PlatformBackend = macos::FsEventBackend;

#[cfg(windows)]
pub(crate) type PlatformBackend = windows::DirectoryBackend;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    windows
)))]
pub(crate) type PlatformBackend = UnsupportedBackend;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    windows
)))]
pub(crate) struct UnsupportedBackend;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    windows
)))]
impl Backend for UnsupportedBackend {
    fn start(_ctx: BackendContext) -> Result<Self> {
        Err(famwatch_core::WatchError::Unsupported(std::env::consts::OS))
    }

    fn shutdown(&mut self, _timeout: Duration) {}
}
