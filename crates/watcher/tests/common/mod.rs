//! Common utilities for monitor integration tests

use crossbeam_channel::{unbounded, Receiver};
use famwatch::{ChangeEvent, EventKind, Monitor, MonitorConfig};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Generous upper bound for an expected event to show up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Config with a short rename grace so move-out tests stay fast
pub fn quick_config() -> MonitorConfig {
    MonitorConfig {
        rename_grace_ms: 300,
        kill_timeout_ms: 2_000,
        ..MonitorConfig::default()
    }
}

/// A watched temp directory plus the events its monitor delivered
pub struct WatchedDir {
    pub monitor: Option<Monitor>,
    pub dir: TempDir,
    events: Receiver<ChangeEvent>,
}

impl WatchedDir {
    pub fn new() -> Self {
        Self::with_config(quick_config())
    }

    pub fn with_config(config: MonitorConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = unbounded();
        let monitor = Monitor::start_with_config(dir.path(), "famTest", config, tx).unwrap();
        Self {
            monitor: Some(monitor),
            dir,
            events: rx,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Consume events until one matches; None on timeout
    pub fn wait_for<F>(&self, mut matches: F) -> Option<ChangeEvent>
    where
        F: FnMut(&ChangeEvent) -> bool,
    {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            match self.events.recv_timeout(left) {
                Ok(event) if matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn wait_kind(&self, kind: EventKind, path: &Path) -> Option<ChangeEvent> {
        self.wait_for(|e| e.kind == kind && e.source == path)
    }

    /// Everything delivered during the next `window`
    pub fn collect_for(&self, window: Duration) -> Vec<ChangeEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match self.events.recv_timeout(left) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    pub fn stop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}
