//! inotify backend
//!
//! One thread owns the inotify instance, the watch table and the cookie
//! table. It polls the inotify descriptor together with an eventfd used to
//! interrupt the wait on shutdown.
//!
//! A `MOVED_FROM` parks its path under the event cookie. The matching
//! `MOVED_TO` turns it into a move; a parked path that waits longer than
//! the rename grace window moved out of the tree and is reported deleted.
//!
//! A departing directory's watches are detached from the watch table at
//! `MOVED_FROM` time and parked under the same cookie, so a new directory
//! created at the old path during the grace window gets its own watches.

use super::{Backend, BackendContext};
use crate::shared::Shared;
use crate::thread::ThreadSlot;
use famwatch_core::walk::walk_dirs;
use famwatch_core::{
    ChangeEvent, Clock, CorrelationTable, DetachedSubtree, MonitorConfig, Result, WatchError,
    WatchTable,
};
use inotify::{EventMask, EventOwned, Inotify, WatchDescriptor, WatchMask};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MODIFY
        | WatchMask::ATTRIB
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
}

/// Back-off after a failed poll so a persistent error does not spin
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct InotifyBackend {
    thread: Option<ThreadSlot>,
    waker: Arc<Waker>,
}

impl Backend for InotifyBackend {
    fn start(ctx: BackendContext) -> Result<Self> {
        let inotify = Inotify::init().map_err(WatchError::SourceOpen)?;
        let waker = Arc::new(Waker::new().map_err(WatchError::SourceOpen)?);

        let name = ctx.name.clone();
        let thread_waker = Arc::clone(&waker);
        let thread = ThreadSlot::spawn(&name, move || {
            KernelQueue::new(inotify, thread_waker, ctx).run();
        })?;

        Ok(Self {
            thread: Some(thread),
            waker,
        })
    }

    fn shutdown(&mut self, timeout: Duration) {
        self.waker.wake();
        if let Some(thread) = self.thread.take() {
            thread.join_timeout(timeout);
        }
    }
}

/// eventfd used to break the poll wait
struct Waker {
    fd: OwnedFd,
}

impl Waker {
    fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, the returned descriptor is checked below
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a freshly created descriptor nobody else owns
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn wake(&self) {
        let one: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64 to our own eventfd
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            warn!("Failed to wake inotify thread: {}", io::Error::last_os_error());
        }
    }

    fn reset(&self) {
        let mut value: u64 = 0;
        // SAFETY: reads 8 bytes into a live u64; the fd is non-blocking
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

struct KernelQueue {
    inotify: Inotify,
    waker: Arc<Waker>,
    root: PathBuf,
    config: MonitorConfig,
    shared: Arc<Shared>,
    clock: Clock,
    watches: WatchTable<WatchDescriptor>,
    /// cookie → path of a `MOVED_FROM` waiting for its partner
    cookies: CorrelationTable<u32>,
    /// cookie → watches of a departed directory tree
    departed: HashMap<u32, DetachedSubtree<WatchDescriptor>>,
    /// Paths already reported by a directory listing, with the report time
    announced: HashMap<PathBuf, u64>,
}

impl KernelQueue {
    fn new(inotify: Inotify, waker: Arc<Waker>, ctx: BackendContext) -> Self {
        Self {
            inotify,
            waker,
            root: ctx.root,
            config: ctx.config,
            shared: ctx.shared,
            clock: ctx.clock,
            watches: WatchTable::new(),
            cookies: CorrelationTable::new(),
            departed: HashMap::new(),
            announced: HashMap::new(),
        }
    }

    fn run(mut self) {
        info!("Opened inotify handle in {}", self.root.display());

        let root = self.root.clone();
        let scan = walk_dirs(&root, |dir| match self.add_watch(dir) {
            Err(e) if e.is_vanished() && dir != root => Ok(()),
            other => other,
        });
        if let Err(e) = scan {
            error!("Initial scan of {} failed: {}", root.display(), e);
            self.shared.fail(e);
            return;
        }
        debug!("Loaded existing directory structure ({} watches)", self.watches.len());
        self.shared.mark_initialized();

        let mut buffer = vec![0u8; self.config.read_buffer_size];

        while !self.shared.is_quitting() {
            let timeout = if self.cookies.is_empty() {
                self.config.poll_timeout()
            } else {
                self.config.queue_timeout()
            };

            match self.wait(timeout) {
                Ok(true) => self.drain(&mut buffer),
                Ok(false) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Poll on inotify handle failed: {}", e);
                    thread::sleep(POLL_ERROR_BACKOFF);
                }
            }

            self.sweep();
        }

        if !self.cookies.is_empty() {
            debug!("Dropping {} unresolved departures", self.cookies.len());
        }
        let released = self.watches.drain_tokens().len();
        info!(
            "inotify thread for {} quitting ({} watches released)",
            self.root.display(),
            released
        );
    }

    /// Wait for the inotify descriptor; returns true if it is readable
    fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let mut fds = [
            libc::pollfd {
                fd: self.inotify.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.waker.raw(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        // SAFETY: fds is a live array of two initialized pollfd structs
        let n = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout.as_millis().min(i32::MAX as u128) as libc::c_int,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if fds[1].revents != 0 {
            self.waker.reset();
        }
        Ok(fds[0].revents & libc::POLLIN != 0)
    }

    fn drain(&mut self, buffer: &mut [u8]) {
        loop {
            let events: Vec<EventOwned> = match self.inotify.read_events(buffer) {
                Ok(events) => events.map(|e| e.to_owned()).collect(),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("Failed to read inotify handle: {}", e);
                    return;
                }
            };
            if events.is_empty() {
                return;
            }
            for event in events {
                self.process(event);
                if self.shared.is_quitting() {
                    return;
                }
            }
        }
    }

    fn process(&mut self, event: EventOwned) {
        let mask = event.mask;

        if mask.contains(EventMask::Q_OVERFLOW) {
            warn!("inotify queue overflowed in {}; events were lost", self.root.display());
            return;
        }

        let Some(dir) = self.watches.path_of(&event.wd).map(Path::to_path_buf) else {
            if mask.contains(EventMask::IGNORED) {
                for subtree in self.departed.values_mut() {
                    subtree.forget_token(&event.wd);
                }
            }
            trace!("No path for watch {:?}, ignoring {:?}", event.wd, mask);
            return;
        };
        let path = match &event.name {
            Some(name) => dir.join(name),
            None => dir,
        };
        let is_dir = mask.contains(EventMask::ISDIR);
        trace!("inotify {:?} cookie {} on {}", mask, event.cookie, path.display());

        if mask.intersects(EventMask::DELETE_SELF | EventMask::IGNORED) {
            if self.watches.remove_token(&event.wd).is_some() {
                debug!("Removed watch for {}", path.display());
            }
            return;
        }
        if mask.contains(EventMask::MOVE_SELF) {
            return;
        }
        if mask.contains(EventMask::MOVED_FROM) {
            let now = self.clock.now_ms();
            let subtree = self.watches.detach_prefix(&path);
            if let Some(stale) = self.cookies.insert(event.cookie, path, now) {
                debug!("Cookie {} reused; {} moved away", event.cookie, stale.origin.display());
                self.release_departed(event.cookie);
                self.shared.emit(ChangeEvent::deleted(stale.origin));
            }
            if !subtree.is_empty() {
                self.departed.insert(event.cookie, subtree);
            }
            return;
        }
        if mask.contains(EventMask::MOVED_TO) {
            self.moved_to(event.cookie, path, is_dir);
            return;
        }

        if mask.contains(EventMask::CREATE) {
            self.created(path.clone(), is_dir, true);
        }
        if mask.contains(EventMask::ATTRIB) {
            self.shared.emit(ChangeEvent::attribute_changed(&path));
            if is_dir && !self.watches.contains_path(&path) {
                self.register_or_quit(&path, false);
            }
        }
        if mask.contains(EventMask::MODIFY) && !is_dir {
            self.shared.emit(ChangeEvent::modified(&path));
        }
        if mask.contains(EventMask::DELETE) {
            self.announced.remove(&path);
            self.shared.emit(ChangeEvent::deleted(&path));
        }
    }

    fn moved_to(&mut self, cookie: u32, path: PathBuf, is_dir: bool) {
        match self.cookies.take(&cookie) {
            Some(entry) => {
                self.shared.emit(ChangeEvent::moved(&entry.origin, &path));
                match self.departed.remove(&cookie) {
                    Some(subtree) => {
                        let n = self.watches.reattach(subtree, &path);
                        debug!(
                            "Rewrote {} watches from {} to {}",
                            n,
                            entry.origin.display(),
                            path.display()
                        );
                    }
                    None if is_dir => self.register_or_quit(&path, false),
                    None => {}
                }
            }
            None => {
                debug!("Move to {} has no matching cookie {}", path.display(), cookie);
                self.created(path, is_dir, false);
            }
        }
    }

    /// Report a new entry and start watching it if it is a directory
    ///
    /// With `list_contents`, entries already inside a new directory are
    /// reported too, since they may have appeared before its watch existed.
    fn created(&mut self, path: PathBuf, is_dir: bool, list_contents: bool) {
        if self.announced.remove(&path).is_some() {
            trace!("{} was already reported by a listing", path.display());
            return;
        }
        self.shared.emit(ChangeEvent::created(&path));
        if is_dir {
            self.register_or_quit(&path, list_contents);
        }
    }

    fn register_or_quit(&mut self, dir: &Path, list_contents: bool) {
        if let Err(e) = self.register_dir(dir, list_contents) {
            error!("Failed to watch {}: {}; stopping monitor", dir.display(), e);
            self.shared.fail(e);
        }
    }

    /// Watch `dir` and everything below it
    ///
    /// The watch is added before the directory is listed, so an entry is
    /// either in the listing or produces its own event.
    fn register_dir(&mut self, dir: &Path, list_contents: bool) -> Result<()> {
        match self.add_watch(dir) {
            Ok(()) => {}
            Err(e) if e.is_vanished() => {
                debug!("{} vanished before it could be watched", dir.display());
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(WatchError::registration(dir, e)),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if list_contents {
                self.shared.emit(ChangeEvent::created(&path));
                self.announced.insert(path.clone(), self.clock.now_ms());
            }
            if is_dir {
                self.register_dir(&path, list_contents)?;
            }
        }
        Ok(())
    }

    fn add_watch(&mut self, dir: &Path) -> Result<()> {
        let wd = self
            .inotify
            .watches()
            .add(dir, watch_mask())
            .map_err(|e| WatchError::registration(dir, e))?;
        trace!("Watching {} as {:?}", dir.display(), wd);
        self.watches.insert(wd, dir);
        Ok(())
    }

    /// Report parked moves that outlived the grace window as deletions
    fn sweep(&mut self) {
        let now = self.clock.now_ms();
        let grace = self.config.rename_grace_ms;

        for (cookie, entry) in self.cookies.sweep(now, grace) {
            debug!("Cookie {} expired; {} moved out", cookie, entry.origin.display());
            self.release_departed(cookie);
            self.shared.emit(ChangeEvent::deleted(entry.origin));
        }

        self.announced.retain(|_, at| now.saturating_sub(*at) <= grace);
    }

    /// Drop the native watches of a tree that left under `cookie`
    fn release_departed(&mut self, cookie: u32) {
        let Some(subtree) = self.departed.remove(&cookie) else {
            return;
        };
        trace!("Releasing {} watches under {}", subtree.len(), subtree.prefix().display());
        for wd in subtree.into_tokens() {
            let _ = self.inotify.watches().remove(wd);
        }
    }
}
