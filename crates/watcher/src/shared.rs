//! State shared between a monitor handle and its backend threads

use crate::handler::{Dispatcher, EventHandler};
use famwatch_core::{ChangeEvent, WatchError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

pub(crate) struct Shared {
    quit: AtomicBool,
    initialized: AtomicBool,
    failure: Mutex<Option<WatchError>>,
    dispatcher: Dispatcher,
}

impl Shared {
    pub(crate) fn new(handler: Box<dyn EventHandler>) -> Self {
        Self {
            quit: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            failure: Mutex::new(None),
            dispatcher: Dispatcher::new(handler),
        }
    }

    pub(crate) fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Record a fatal backend error and ask every thread to quit
    ///
    /// Only the first failure is kept.
    pub(crate) fn fail(&self, error: WatchError) {
        {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.request_quit();
    }

    pub(crate) fn take_failure(&self) -> Option<WatchError> {
        self.failure.lock().take()
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        debug!("{}", event);
        self.dispatcher.deliver(event);
    }

    /// Stop delivering events, waiting up to `timeout` for a running handler
    pub(crate) fn close(&self, timeout: Duration) -> bool {
        self.dispatcher.close(timeout)
    }
}
