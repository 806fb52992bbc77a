//! ReadDirectoryChangesW backend
//!
//! The worker thread owns every directory handle and issues reads with a
//! completion routine, so completions run on the worker itself while it
//! sleeps alertably. Requests reach it over a channel plus a no-op APC that
//! wakes the sleep.
//!
//! Decoded events are queued to a separate callback thread, which keeps
//! slow handlers from delaying the re-issued read.

use super::{Backend, BackendContext};
use crate::notify_records::{decode_records, PathResolver, RecordTranslator};
use crate::shared::Shared;
use crate::thread::ThreadSlot;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use famwatch_core::{ChangeEvent, Result, WatchError};
use std::ffi::{c_void, OsString};
use std::io;
use std::iter;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, ERROR_OPERATION_ABORTED, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, GetLongPathNameW, ReadDirectoryChangesW, FILE_FLAGS_AND_ATTRIBUTES,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE,
    FILE_NOTIFY_CHANGE_DIR_NAME, FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_WRITE,
    FILE_NOTIFY_CHANGE_SIZE, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Threading::{QueueUserAPC, SleepEx};
use windows::Win32::System::IO::{CancelIo, OVERLAPPED};

/// Alertable sleep of the worker between request checks
const WORKER_SLEEP_MS: u32 = 100;

/// How long teardown waits for cancelled reads to complete
const ABORT_WAIT: Duration = Duration::from_secs(2);

fn notify_filter() -> FILE_NOTIFY_CHANGE {
    FILE_NOTIFY_CHANGE_FILE_NAME
        | FILE_NOTIFY_CHANGE_DIR_NAME
        | FILE_NOTIFY_CHANGE_SIZE
        | FILE_NOTIFY_CHANGE_LAST_WRITE
}

enum WorkerRequest {
    AddDirectory(PathBuf),
    Terminate,
}

pub(crate) struct DirectoryBackend {
    requests: Sender<WorkerRequest>,
    worker: Option<ThreadSlot>,
    callback: Option<ThreadSlot>,
}

impl Backend for DirectoryBackend {
    fn start(ctx: BackendContext) -> Result<Self> {
        let (event_tx, event_rx) = bounded::<ChangeEvent>(ctx.config.event_queue_capacity);
        let (request_tx, request_rx) = unbounded::<WorkerRequest>();

        let cb_shared = Arc::clone(&ctx.shared);
        let poll_timeout = ctx.config.poll_timeout();
        let callback = ThreadSlot::spawn(&format!("{}Cb", ctx.name), move || {
            run_callbacks(event_rx, cb_shared, poll_timeout);
        })?;

        let worker_shared = Arc::clone(&ctx.shared);
        let buffer_size = ctx.config.read_buffer_size;
        let worker = match ThreadSlot::spawn(&format!("{}Wrk", ctx.name), move || {
            // Directory handles never leave this thread
            Worker {
                requests: request_rx,
                events: event_tx,
                shared: worker_shared,
                buffer_size,
                watches: Vec::new(),
                terminated: false,
            }
            .run();
        }) {
            Ok(worker) => worker,
            Err(e) => {
                ctx.shared.request_quit();
                callback.join_timeout(poll_timeout * 2);
                return Err(e);
            }
        };

        let backend = Self {
            requests: request_tx,
            worker: Some(worker),
            callback: Some(callback),
        };
        backend.request(WorkerRequest::AddDirectory(ctx.root));
        Ok(backend)
    }

    fn shutdown(&mut self, timeout: Duration) {
        self.request(WorkerRequest::Terminate);
        if let Some(worker) = self.worker.take() {
            worker.join_timeout(timeout);
        }
        if let Some(callback) = self.callback.take() {
            callback.join_timeout(timeout);
        }
    }
}

impl DirectoryBackend {
    /// Queue a request and wake the worker's alertable sleep
    fn request(&self, request: WorkerRequest) {
        if self.requests.send(request).is_err() {
            return;
        }
        let Some(raw) = self.worker.as_ref().and_then(ThreadSlot::raw_handle) else {
            return;
        };
        // SAFETY: the thread handle stays open while we own the ThreadSlot
        let queued = unsafe { QueueUserAPC(Some(wake_apc), HANDLE(raw), 0) };
        if queued == 0 {
            debug!("Failed to queue wake-up to worker: {}", io::Error::last_os_error());
        }
    }
}

unsafe extern "system" fn wake_apc(_param: usize) {}

fn run_callbacks(events: Receiver<ChangeEvent>, shared: Arc<Shared>, poll_timeout: Duration) {
    loop {
        match events.recv_timeout(poll_timeout) {
            Ok(event) => shared.emit(event),
            Err(RecvTimeoutError::Timeout) => {
                if shared.is_quitting() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Callback thread quitting");
}

struct Worker {
    requests: Receiver<WorkerRequest>,
    events: Sender<ChangeEvent>,
    shared: Arc<Shared>,
    buffer_size: usize,
    watches: Vec<Box<DirWatch>>,
    terminated: bool,
}

impl Worker {
    fn run(&mut self) {
        info!("Directory worker started");
        loop {
            while let Ok(request) = self.requests.try_recv() {
                match request {
                    WorkerRequest::AddDirectory(path) => self.add_directory(path),
                    WorkerRequest::Terminate => self.terminated = true,
                }
            }
            if self.terminated || self.shared.is_quitting() {
                break;
            }
            // SAFETY: plain alertable sleep; completion routines run here
            unsafe { SleepEx(WORKER_SLEEP_MS, true) };
        }
        self.close_all();
        info!("Directory worker quitting");
    }

    fn add_directory(&mut self, path: PathBuf) {
        let handle = match open_directory(&path) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                self.shared.fail(WatchError::registration(&path, e));
                return;
            }
        };

        let mut watch = Box::new(DirWatch {
            handle,
            overlapped: OVERLAPPED::default(),
            buffer: vec![0u32; self.buffer_size.div_ceil(4)],
            backup: Vec::with_capacity(self.buffer_size),
            translator: RecordTranslator::new(&path),
            path,
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
            closing: false,
            finished: false,
        });

        if let Err(e) = watch.begin_read() {
            error!("Failed to start reading {}: {}", watch.path.display(), e);
            // SAFETY: the handle was opened above and no read is pending
            unsafe {
                let _ = CloseHandle(watch.handle);
            }
            self.shared.fail(WatchError::registration(&watch.path, e.into()));
            return;
        }

        info!("Watching {}", watch.path.display());
        self.watches.push(watch);
        self.shared.mark_initialized();
    }

    /// Cancel every read, close the handles and wait for the aborts
    fn close_all(&mut self) {
        for watch in &mut self.watches {
            watch.closing = true;
            // SAFETY: the handle is open; the pending read completes with
            // ERROR_OPERATION_ABORTED during a later alertable wait
            unsafe {
                let _ = CancelIo(watch.handle);
                let _ = CloseHandle(watch.handle);
            }
        }

        let deadline = Instant::now() + ABORT_WAIT;
        while self.watches.iter().any(|w| !w.finished) && Instant::now() < deadline {
            // SAFETY: alertable sleep lets the abort completions run
            unsafe { SleepEx(WORKER_SLEEP_MS / 2, true) };
        }

        for watch in self.watches.drain(..) {
            if watch.finished {
                drop(watch);
            } else {
                // The kernel may still write into it
                warn!("Read on {} never completed; leaking its buffer", watch.path.display());
                let _ = Box::leak(watch);
            }
        }
    }
}

/// One watched directory with its pending read
struct DirWatch {
    handle: HANDLE,
    /// `hEvent` carries a pointer back to this struct
    overlapped: OVERLAPPED,
    /// Read target; u32 storage keeps it DWORD-aligned
    buffer: Vec<u32>,
    /// Copy of the completed records, decoded after the next read is issued
    backup: Vec<u8>,
    translator: RecordTranslator,
    path: PathBuf,
    events: Sender<ChangeEvent>,
    shared: Arc<Shared>,
    closing: bool,
    finished: bool,
}

impl DirWatch {
    fn begin_read(&mut self) -> windows::core::Result<()> {
        let this: *mut DirWatch = self;
        self.overlapped = OVERLAPPED::default();
        self.overlapped.hEvent = HANDLE(this.cast::<c_void>());

        trace!("Issuing read on {}", self.path.display());
        // SAFETY: `self` is boxed and outlives the read; the buffer and the
        // OVERLAPPED stay in place until the completion routine runs
        unsafe {
            ReadDirectoryChangesW(
                self.handle,
                self.buffer.as_mut_ptr().cast::<c_void>(),
                (self.buffer.len() * 4) as u32,
                true,
                notify_filter(),
                None,
                Some(&mut self.overlapped),
                Some(on_read_complete),
            )
        }
    }

    fn completed(&mut self, error_code: u32, transferred: u32) {
        if error_code == ERROR_OPERATION_ABORTED.0 || self.closing {
            self.finished = true;
            return;
        }
        if error_code != 0 {
            let e = io::Error::from_raw_os_error(error_code as i32);
            error!("Read on {} failed: {}", self.path.display(), e);
            self.finished = true;
            self.shared.fail(WatchError::registration(&self.path, e));
            return;
        }
        if transferred == 0 {
            warn!("Change buffer for {} overflowed; events were lost", self.path.display());
            self.reissue();
            return;
        }

        let len = (transferred as usize).min(self.buffer.len() * 4);
        self.backup.clear();
        self.backup
            .extend(self.buffer.iter().flat_map(|w| w.to_le_bytes()).take(len));

        // Re-arm before decoding so changes made meanwhile are not missed
        self.reissue();

        let resolver = Win32Resolver;
        for record in decode_records(&self.backup) {
            for event in self.translator.translate(&record, &resolver) {
                if self.events.send(event).is_err() {
                    return;
                }
            }
        }
    }

    fn reissue(&mut self) {
        if let Err(e) = self.begin_read() {
            error!("Failed to re-issue read on {}: {}", self.path.display(), e);
            self.finished = true;
            self.shared.fail(WatchError::registration(&self.path, e.into()));
        }
    }
}

unsafe extern "system" fn on_read_complete(
    error_code: u32,
    transferred: u32,
    overlapped: *mut OVERLAPPED,
) {
    // SAFETY: hEvent was set to the owning DirWatch by begin_read, and the
    // worker keeps it alive until this routine has seen the abort
    let watch = unsafe { &mut *((*overlapped).hEvent.0 as *mut DirWatch) };
    watch.completed(error_code, transferred);
}

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(iter::once(0)).collect()
}

fn open_directory(path: &Path) -> io::Result<HANDLE> {
    let wide = to_wide(path);
    // SAFETY: `wide` is NUL-terminated and outlives the call
    let handle = unsafe {
        CreateFileW(
            PCWSTR(wide.as_ptr()),
            FILE_LIST_DIRECTORY.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(FILE_FLAG_BACKUP_SEMANTICS.0 | FILE_FLAG_OVERLAPPED.0),
            None,
        )
    };
    handle.map_err(io::Error::from)
}

struct Win32Resolver;

impl PathResolver for Win32Resolver {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn expand_short_name(&self, path: &Path) -> Option<PathBuf> {
        let wide = to_wide(path);
        // SAFETY: `wide` is NUL-terminated; the second call gets a buffer of
        // the size the first one asked for
        unsafe {
            let needed = GetLongPathNameW(PCWSTR(wide.as_ptr()), None);
            if needed == 0 {
                return None;
            }
            let mut long = vec![0u16; needed as usize];
            let written = GetLongPathNameW(PCWSTR(wide.as_ptr()), Some(&mut long));
            if written == 0 || written as usize >= long.len() {
                return None;
            }
            Some(PathBuf::from(OsString::from_wide(&long[..written as usize])))
        }
    }
}
