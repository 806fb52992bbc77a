//! Event handlers and the delivery gate in front of them

use crossbeam_channel::SendTimeoutError;
use famwatch_core::ChangeEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

/// How long a channel handler blocks before checking for shutdown
const SEND_RETRY: Duration = Duration::from_millis(50);

/// Receives change events on a monitor thread
///
/// Closures and `crossbeam_channel::Sender`s implement this, so user
/// context is simply whatever the closure captures.
pub trait EventHandler: Send + 'static {
    /// Handle one event; ownership of the event passes to the handler
    fn handle_event(&mut self, event: ChangeEvent);

    /// Handle one event, giving up if `stopping` reports the monitor is
    /// shutting down
    ///
    /// Handlers that can block for a long time override this so `stop`
    /// does not have to wait for them. The default ignores `stopping`.
    fn handle_event_until(&mut self, event: ChangeEvent, stopping: &dyn Fn() -> bool) {
        let _ = stopping;
        self.handle_event(event);
    }
}

impl<F> EventHandler for F
where
    F: FnMut(ChangeEvent) + Send + 'static,
{
    fn handle_event(&mut self, event: ChangeEvent) {
        (self)(event);
    }
}

impl EventHandler for crossbeam_channel::Sender<ChangeEvent> {
    fn handle_event(&mut self, event: ChangeEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.send(event);
    }

    fn handle_event_until(&mut self, mut event: ChangeEvent, stopping: &dyn Fn() -> bool) {
        loop {
            match self.send_timeout(event, SEND_RETRY) {
                Ok(()) | Err(SendTimeoutError::Disconnected(_)) => return,
                Err(SendTimeoutError::Timeout(unsent)) => {
                    if stopping() {
                        trace!("dropping {} (receiver full at shutdown)", unsent);
                        return;
                    }
                    event = unsent;
                }
            }
        }
    }
}

/// Gate between backend threads and the user handler
///
/// The handler runs while the gate's lock is held. Closing the gate first
/// raises a flag that stops new deliveries, then takes the same lock with
/// a timeout, so once [`Dispatcher::close`] returns true no handler call is
/// running and none can start.
pub(crate) struct Dispatcher {
    closed: AtomicBool,
    handler: Mutex<Option<Box<dyn EventHandler>>>,
}

impl Dispatcher {
    pub(crate) fn new(handler: Box<dyn EventHandler>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            handler: Mutex::new(Some(handler)),
        }
    }

    fn closing(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hand `event` to the handler; returns false once the gate is closed
    pub(crate) fn deliver(&self, event: ChangeEvent) -> bool {
        if self.closing() {
            trace!("dropping {} (monitor stopped)", event);
            return false;
        }

        let mut guard = self.handler.lock();
        match guard.as_mut() {
            Some(handler) if !self.closing() => {
                trace!("delivering {}", event);
                handler.handle_event_until(event, &|| self.closing());
                true
            }
            _ => {
                trace!("dropping {} (monitor stopped)", event);
                false
            }
        }
    }

    /// Close the gate and drop the handler
    ///
    /// Waits up to `timeout` for a handler call in progress. If it does not
    /// return in time the call is abandoned with a warning; the handler is
    /// then dropped with the last reference to the gate. Returns false in
    /// that case.
    pub(crate) fn close(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        match self.handler.try_lock_for(timeout) {
            Some(mut guard) => {
                guard.take();
                true
            }
            None => {
                warn!(
                    "Event handler still running after {:?}; abandoning it",
                    timeout
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closing() && self.handler.lock().is_none()
    }
}
