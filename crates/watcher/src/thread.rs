//! Named backend threads with bounded joins

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use famwatch_core::{Result, WatchError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// A spawned thread that can be joined with a timeout
///
/// The thread holds the sending half of an exit channel; the channel
/// disconnects when the thread returns or unwinds, which is what
/// [`ThreadSlot::join_timeout`] waits on.
pub(crate) struct ThreadSlot {
    name: String,
    handle: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl ThreadSlot {
    /// Spawn `body` on a new thread called `name`
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let span = tracing::info_span!("monitor", thread = %name);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit = exit_tx;
                let _enter = span.enter();
                body();
            })
            .map_err(|source| WatchError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            exited: exit_rx,
        })
    }

    #[cfg(test)]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[cfg(any(target_os = "macos", test))]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Native thread handle, needed to queue APCs to the thread
    #[cfg(windows)]
    pub(crate) fn raw_handle(&self) -> Option<std::os::windows::io::RawHandle> {
        use std::os::windows::io::AsRawHandle;
        self.handle.as_ref().map(|h| h.as_raw_handle())
    }

    /// Wait up to `timeout` for the thread to exit
    ///
    /// A thread that does not exit in time is detached and left to observe
    /// the quit flag on its own. Returns true if the thread was joined.
    pub(crate) fn join_timeout(mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("Thread {} panicked before shutdown", self.name);
                } else {
                    info!("Thread {} has been shut down", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Thread {} timed out after {:?} and was abandoned",
                    self.name, timeout
                );
                drop(handle);
                false
            }
        }
    }
}
