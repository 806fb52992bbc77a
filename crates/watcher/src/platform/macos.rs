//! FSEvents backend
//!
//! Two threads per monitor:
//! - the stream thread runs a CoreFoundation run loop with one file-level
//!   event stream scheduled on it; the stream callback classifies events
//!   through the identity tracker
//! - the cleaner thread reports vacated paths nobody claimed in time
//!
//! Both touch the tracker under one mutex.

use super::{Backend, BackendContext};
use crate::identity::{IdentityTracker, StreamFlags};
use crate::shared::Shared;
use crate::thread::ThreadSlot;
use famwatch_core::walk::walk_tree;
use famwatch_core::watch_table::normalize_path;
use famwatch_core::{ChangeEvent, Clock, Result, WatchError};
use fsevent_sys as fse;
use fsevent_sys::core_foundation as cf;
use parking_lot::Mutex;
use std::ffi::{c_void, CStr, OsStr};
use std::io;
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Longest single sleep of the cleaner thread
const CLEANER_SLICE: Duration = Duration::from_millis(100);

/// Interval between run loop stop attempts during shutdown
const STOP_RETRY: Duration = Duration::from_millis(10);

pub(crate) struct FsEventBackend {
    state: Arc<StreamState>,
    stream_thread: Option<ThreadSlot>,
    cleaner_thread: Option<ThreadSlot>,
}

/// Run loop of the stream thread, published so shutdown can stop it
struct RunLoop(cf::CFRunLoopRef);

// SAFETY: CFRunLoopStop may be called from any thread
unsafe impl Send for RunLoop {}

struct StreamState {
    root: PathBuf,
    shared: Arc<Shared>,
    clock: Clock,
    tracker: Mutex<IdentityTracker>,
    run_loop: Mutex<Option<RunLoop>>,
}

impl Backend for FsEventBackend {
    fn start(ctx: BackendContext) -> Result<Self> {
        let latency = ctx.config.stream_latency();
        let state = Arc::new(StreamState {
            root: ctx.root,
            shared: ctx.shared,
            clock: ctx.clock,
            tracker: Mutex::new(IdentityTracker::new(ctx.config.bucket_millis)),
            run_loop: Mutex::new(None),
        });

        let stream_state = Arc::clone(&state);
        let stream_thread = ThreadSlot::spawn(&ctx.name, move || {
            run_stream(stream_state, latency);
        })?;

        let cleaner_state = Arc::clone(&state);
        let cleaner_thread = match ThreadSlot::spawn(&format!("{}Cleaner", ctx.name), move || {
            run_cleaner(cleaner_state);
        }) {
            Ok(thread) => thread,
            Err(e) => {
                state.shared.request_quit();
                stop_run_loop(&state, &stream_thread, Duration::from_secs(1));
                stream_thread.join_timeout(Duration::from_secs(1));
                return Err(e);
            }
        };

        Ok(Self {
            state,
            stream_thread: Some(stream_thread),
            cleaner_thread: Some(cleaner_thread),
        })
    }

    fn shutdown(&mut self, timeout: Duration) {
        if let Some(thread) = self.stream_thread.take() {
            stop_run_loop(&self.state, &thread, timeout);
            thread.join_timeout(timeout);
        }
        if let Some(thread) = self.cleaner_thread.take() {
            thread.join_timeout(timeout);
        }
    }
}

/// Keep stopping the stream thread's run loop until the thread exits
///
/// A stop issued before the loop is entered has no effect, so one call is
/// not enough.
fn stop_run_loop(state: &StreamState, thread: &ThreadSlot, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() && Instant::now() < deadline {
        if let Some(run_loop) = state.run_loop.lock().as_ref() {
            // SAFETY: the run loop stays valid until the stream thread exits
            unsafe { cf::CFRunLoopStop(run_loop.0) };
        }
        thread::sleep(STOP_RETRY);
    }
}

fn run_stream(state: Arc<StreamState>, latency: Duration) {
    let root = state.root.clone();
    let Some(root_str) = root.to_str() else {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "path is not valid UTF-8");
        state.shared.fail(WatchError::registration(&root, err));
        return;
    };

    // SAFETY: every CoreFoundation object created here is released on this
    // thread, and the stream is invalidated before `state` can be dropped
    unsafe {
        let paths =
            cf::CFArrayCreateMutable(cf::kCFAllocatorDefault, 0, &cf::kCFTypeArrayCallBacks);
        let mut err: cf::CFErrorRef = ptr::null_mut();
        let cf_path = cf::str_path_to_cfstring_ref(root_str, &mut err);
        if cf_path.is_null() {
            cf::CFRelease(paths);
            let err = io::Error::new(io::ErrorKind::InvalidInput, "cannot convert path");
            state.shared.fail(WatchError::registration(&root, err));
            return;
        }
        cf::CFArrayAppendValue(paths, cf_path);
        cf::CFRelease(cf_path);

        let context = fse::FSEventStreamContext {
            version: 0,
            info: Arc::as_ptr(&state) as *mut c_void,
            retain: None,
            release: None,
            copy_description: None,
        };

        let stream = fse::FSEventStreamCreate(
            cf::kCFAllocatorDefault,
            stream_callback,
            &context,
            paths,
            fse::kFSEventStreamEventIdSinceNow,
            latency.as_secs_f64(),
            fse::kFSEventStreamCreateFlagFileEvents | fse::kFSEventStreamCreateFlagNoDefer,
        );
        cf::CFRelease(paths);

        if stream.is_null() {
            error!("Failed to create event stream for {}", root.display());
            state.shared.fail(WatchError::SourceOpen(io::Error::new(
                io::ErrorKind::Other,
                "FSEventStreamCreate failed",
            )));
            return;
        }

        let run_loop = cf::CFRunLoopGetCurrent();
        fse::FSEventStreamScheduleWithRunLoop(stream, run_loop, cf::kCFRunLoopDefaultMode);

        if fse::FSEventStreamStart(stream) == 0 {
            error!("Failed to start event stream for {}", root.display());
            fse::FSEventStreamInvalidate(stream);
            fse::FSEventStreamRelease(stream);
            state.shared.fail(WatchError::SourceOpen(io::Error::new(
                io::ErrorKind::Other,
                "FSEventStreamStart failed",
            )));
            return;
        }
        info!("Event stream started for {}", root.display());

        // Callbacks only run inside CFRunLoopRun below, so the seed is
        // complete before the first event is classified
        if let Err(e) = state.seed(&root, false) {
            error!("Initial scan of {} failed: {}", root.display(), e);
            fse::FSEventStreamStop(stream);
            fse::FSEventStreamInvalidate(stream);
            fse::FSEventStreamRelease(stream);
            state.shared.fail(e);
            return;
        }
        debug!("Seeded {} paths under {}", state.tracker.lock().len(), root.display());

        *state.run_loop.lock() = Some(RunLoop(run_loop));
        state.shared.mark_initialized();

        if !state.shared.is_quitting() {
            cf::CFRunLoopRun();
        }

        state.run_loop.lock().take();
        fse::FSEventStreamStop(stream);
        fse::FSEventStreamInvalidate(stream);
        fse::FSEventStreamRelease(stream);
    }

    info!("Event stream for {} quitting", root.display());
}

extern "C" fn stream_callback(
    _stream: fse::FSEventStreamRef,
    info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const fse::FSEventStreamEventFlags,
    _event_ids: *const fse::FSEventStreamEventId,
) {
    // SAFETY: `info` is the StreamState kept alive by the stream thread for
    // as long as the stream is scheduled
    let state = unsafe { &*(info as *const StreamState) };
    let paths = event_paths as *const *const c_char;

    for i in 0..num_events {
        // SAFETY: FSEvents hands us `num_events` C strings and flag words
        let (raw, bits) = unsafe { (CStr::from_ptr(*paths.add(i)), *event_flags.add(i)) };
        let path = normalize_path(Path::new(OsStr::from_bytes(raw.to_bytes())));
        state.handle(&path, StreamFlags::from_bits_truncate(bits));
    }
}

impl StreamState {
    fn handle(&self, path: &Path, flags: StreamFlags) {
        if self.shared.is_quitting() {
            return;
        }
        trace!("stream event {:?} on {}", flags, path.display());

        if flags.contains(StreamFlags::ROOT_CHANGED) {
            warn!("Watched root {} changed", self.root.display());
            return;
        }
        if flags.dropped_events() {
            warn!("Event stream dropped events under {}; rescanning", path.display());
            if let Err(e) = self.seed(path, false) {
                debug!("Rescan of {} failed: {}", path.display(), e);
            }
            return;
        }
        if !path.starts_with(&self.root) {
            return;
        }

        let inode = inode_at(path);
        let now = self.clock.now_ms();

        let events = {
            let mut tracker = self.tracker.lock();
            let identity = tracker.classify(path, inode, flags, now);
            trace!("{} classified as {:?}", path.display(), identity);
            let outcome = IdentityTracker::outcome(path, flags, identity);
            let mut events = outcome.events;
            if outcome.seed_dir {
                match seed_tree(&mut tracker, path, true) {
                    Ok(children) => events.extend(children),
                    Err(e) => debug!("Listing new directory {} failed: {}", path.display(), e),
                }
            }
            events
        };

        for event in events {
            self.shared.emit(event);
        }
    }

    fn seed(&self, dir: &Path, report: bool) -> Result<Vec<ChangeEvent>> {
        seed_tree(&mut self.tracker.lock(), dir, report)
    }
}

/// Record the tree under `dir` in the tracker
///
/// With `report`, every entry below `dir` not already known becomes a
/// Created event.
fn seed_tree(tracker: &mut IdentityTracker, dir: &Path, report: bool) -> Result<Vec<ChangeEvent>> {
    let mut events = Vec::new();
    walk_tree(dir, |path, _is_dir| {
        if let Some(inode) = inode_at(path) {
            if tracker.seed(path, inode) && report && path != dir {
                events.push(ChangeEvent::created(path));
            }
        }
        Ok(())
    })?;
    Ok(events)
}

fn inode_at(path: &Path) -> Option<u64> {
    std::fs::symlink_metadata(path).ok().map(|m| m.ino())
}

fn run_cleaner(state: Arc<StreamState>) {
    info!("Move cleaner started for {}", state.root.display());

    while !state.shared.is_quitting() {
        let expired = state.tracker.lock().expire(state.clock.now_ms());
        for path in expired {
            debug!("{} moved out of the tree", path.display());
            state.shared.emit(ChangeEvent::deleted(path));
        }
        thread::sleep(CLEANER_SLICE);
    }

    let pending = state.tracker.lock().pending_moves();
    if pending > 0 {
        debug!("Move cleaner exiting with {} unresolved departures", pending);
    }
}
