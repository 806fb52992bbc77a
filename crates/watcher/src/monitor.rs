//! The monitor handle

use crate::handler::EventHandler;
use crate::platform::{Backend, BackendContext, PlatformBackend};
use crate::shared::Shared;
use famwatch_core::{Clock, MonitorConfig, Result, WatchError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A running monitor over one directory tree
///
/// Events are delivered to the handler on a backend thread. Dropping the
/// monitor stops it; [`Monitor::stop`] does the same explicitly.
///
/// ```no_run
/// use famwatch::{ChangeEvent, Monitor};
///
/// let monitor = Monitor::start("/tmp/project", "fam", |event: ChangeEvent| {
///     println!("{}", event);
/// })?;
/// // ...
/// monitor.stop();
/// # Ok::<(), famwatch::WatchError>(())
/// ```
pub struct Monitor {
    root: PathBuf,
    name: String,
    shared: Arc<Shared>,
    backend: Option<PlatformBackend>,
    kill_timeout: Duration,
}

/// Cloneable handle that can ask a monitor to quit from any thread
#[derive(Clone)]
pub struct QuitHandle {
    shared: Arc<Shared>,
}

impl QuitHandle {
    /// Ask the monitor's threads to exit; event delivery stops when the
    /// owning [`Monitor`] is stopped or dropped
    pub fn request_quit(&self) {
        self.shared.request_quit();
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.is_quitting()
    }
}

impl Monitor {
    /// Start monitoring `root` with the default configuration
    ///
    /// `name` labels the monitor's threads and log lines.
    pub fn start<P, H>(root: P, name: &str, handler: H) -> Result<Self>
    where
        P: AsRef<Path>,
        H: EventHandler,
    {
        Self::start_with_config(root, name, MonitorConfig::default(), handler)
    }

    /// Start monitoring `root`
    ///
    /// Blocks until the backend has registered the existing tree. If the
    /// backend gives up first, the error it reported is returned and no
    /// event is ever delivered.
    pub fn start_with_config<P, H>(
        root: P,
        name: &str,
        config: MonitorConfig,
        handler: H,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        H: EventHandler,
    {
        config.validate()?;
        let root = prepare_root(root.as_ref())?;
        let shared = Arc::new(Shared::new(Box::new(handler)));
        let queue_timeout = config.queue_timeout();
        let kill_timeout = config.kill_timeout();

        info!("Starting monitor {} on {}", name, root.display());

        let ctx = BackendContext {
            root: root.clone(),
            name: name.to_string(),
            config,
            shared: Arc::clone(&shared),
            clock: Clock::new(),
        };

        let backend = match PlatformBackend::start(ctx) {
            Ok(backend) => backend,
            Err(e) => {
                shared.close(kill_timeout);
                return Err(e);
            }
        };

        let mut monitor = Self {
            root,
            name: name.to_string(),
            shared,
            backend: Some(backend),
            kill_timeout,
        };

        while !monitor.shared.is_initialized() && !monitor.shared.is_quitting() {
            thread::sleep(queue_timeout);
        }

        if monitor.shared.is_quitting() {
            let failure = monitor.shared.take_failure();
            monitor.shutdown();
            warn!("Monitor {} failed to initialize", monitor.name);
            return Err(failure.unwrap_or_else(|| WatchError::InitFailed(monitor.root.clone())));
        }

        debug!("Monitor {} initialized", monitor.name);
        Ok(monitor)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the backend has been asked to quit or has given up
    pub fn is_quitting(&self) -> bool {
        self.shared.is_quitting()
    }

    /// Take the fatal error that made the backend quit, if any
    pub fn take_error(&self) -> Option<WatchError> {
        self.shared.take_failure()
    }

    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the monitor
    ///
    /// Waits for a handler call in progress, then joins the backend
    /// threads. Each wait is bounded by the kill timeout; a handler that
    /// outlives it is abandoned with a warning. No new handler call starts
    /// after this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };

        info!("Stopping monitor {}", self.name);
        self.shared.request_quit();
        self.shared.close(self.kill_timeout);
        backend.shutdown(self.kill_timeout);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("root", &self.root)
            .field("name", &self.name)
            .field("quitting", &self.is_quitting())
            .finish()
    }
}

/// FSEvents reports resolved paths, so the root must be resolved too
#[cfg(target_os = "macos")]
fn prepare_root(root: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(root).map_err(|e| WatchError::registration(root, e))
}

#[cfg(not(target_os = "macos"))]
fn prepare_root(root: &Path) -> Result<PathBuf> {
    let meta = std::fs::metadata(root).map_err(|e| WatchError::registration(root, e))?;
    if !meta.is_dir() {
        return Err(WatchError::registration(
            root,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    Ok(famwatch_core::watch_table::normalize_path(root))
}
