//! End-to-end tests against the native backend
//!
//! Each test watches a fresh temp directory and drives real filesystem
//! operations through it.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::WatchedDir;
use famwatch::{ChangeEvent, EventKind, Monitor};
use filetime::FileTime;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Events with content or metadata noise removed
fn structural(events: &[ChangeEvent]) -> Vec<ChangeEvent> {
    events
        .iter()
        .filter(|e| !matches!(e.kind, EventKind::Modified | EventKind::AttributeChanged))
        .cloned()
        .collect()
}

fn position(events: &[ChangeEvent], kind: EventKind, path: &Path) -> Option<usize> {
    events.iter().position(|e| e.kind == kind && e.source == path)
}

#[test]
fn test_file_lifecycle() {
    let w = WatchedDir::new();
    let file = w.path("notes.txt");

    fs::write(&file, b"one").unwrap();
    assert!(w.wait_kind(EventKind::Created, &file).is_some());

    fs::OpenOptions::new()
        .append(true)
        .open(&file)
        .and_then(|mut f| std::io::Write::write_all(&mut f, b"two"))
        .unwrap();
    assert!(w.wait_kind(EventKind::Modified, &file).is_some());

    fs::remove_file(&file).unwrap();
    assert!(w.wait_kind(EventKind::Deleted, &file).is_some());
}

#[test]
fn test_rename_within_tree_is_move() {
    let w = WatchedDir::new();
    let from = w.path("a.txt");
    let to = w.path("b.txt");
    fs::write(&from, b"x").unwrap();
    assert!(w.wait_kind(EventKind::Created, &from).is_some());

    fs::rename(&from, &to).unwrap();
    let moved = w.wait_kind(EventKind::Moved, &from).expect("move event");
    assert_eq!(moved.dest.as_deref(), Some(to.as_path()));

    // Past the rename grace window: no delete/create pair for the same rename
    let later = w.collect_for(Duration::from_millis(800));
    assert!(position(&later, EventKind::Deleted, &from).is_none(), "{:?}", later);
    assert!(position(&later, EventKind::Created, &to).is_none(), "{:?}", later);
}

#[test]
fn test_create_rename_delete_sequence() {
    let w = WatchedDir::new();
    let a = w.path("a");
    let b = w.path("b");

    fs::write(&a, b"x").unwrap();
    fs::rename(&a, &b).unwrap();
    fs::remove_file(&b).unwrap();

    let events = structural(&w.collect_for(Duration::from_millis(1_000)));
    assert_eq!(
        events,
        vec![
            ChangeEvent::created(&a),
            ChangeEvent::moved(&a, &b),
            ChangeEvent::deleted(&b),
        ]
    );
}

#[test]
fn test_new_directory_reported_before_its_file() {
    let w = WatchedDir::new();
    let sub = w.path("sub");
    let file = sub.join("file");

    fs::create_dir(&sub).unwrap();
    fs::write(&file, b"x").unwrap();

    let events = w.collect_for(Duration::from_millis(1_000));
    let dir_at = position(&events, EventKind::Created, &sub).expect("directory created");
    let file_at = position(&events, EventKind::Created, &file).expect("file created");
    assert!(dir_at < file_at, "events: {:?}", events);
}

#[test]
fn test_rename_out_of_tree_is_delete() {
    let w = WatchedDir::new();
    let outside = TempDir::new().unwrap();
    let file = w.path("leaving.txt");
    fs::write(&file, b"x").unwrap();
    assert!(w.wait_kind(EventKind::Created, &file).is_some());

    fs::rename(&file, outside.path().join("leaving.txt")).unwrap();
    let event = w
        .wait_for(|e| e.source == file && e.kind != EventKind::Modified)
        .expect("event for departed file");
    assert_eq!(event.kind, EventKind::Deleted);
}

#[test]
fn test_rename_into_tree_is_create() {
    let w = WatchedDir::new();
    let outside = TempDir::new().unwrap();
    let src = outside.path().join("arriving.txt");
    fs::write(&src, b"x").unwrap();

    let dest = w.path("arriving.txt");
    fs::rename(&src, &dest).unwrap();
    assert!(w.wait_kind(EventKind::Created, &dest).is_some());
}

#[test]
fn test_new_directory_contents_reported_once() {
    let w = WatchedDir::new();
    let nested = w.path("d/e");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("f.txt"), b"x").unwrap();

    let events = w.collect_for(Duration::from_millis(1_000));
    let created = |p: &std::path::Path| {
        events
            .iter()
            .filter(|e| e.kind == EventKind::Created && e.source == p)
            .count()
    };

    assert_eq!(created(&w.path("d")), 1, "events: {:?}", events);
    assert_eq!(created(&nested), 1, "events: {:?}", events);
    assert_eq!(created(&nested.join("f.txt")), 1, "events: {:?}", events);
}

#[test]
fn test_renamed_directory_keeps_watching() {
    let w = WatchedDir::new();
    let d1 = w.path("d1");
    let d2 = w.path("d2");
    fs::create_dir(&d1).unwrap();
    assert!(w.wait_kind(EventKind::Created, &d1).is_some());

    fs::rename(&d1, &d2).unwrap();
    assert!(w.wait_kind(EventKind::Moved, &d1).is_some());

    let inner = d2.join("inner.txt");
    fs::write(&inner, b"x").unwrap();
    assert!(w.wait_kind(EventKind::Created, &inner).is_some());
}

#[test]
fn test_renamed_directory_rewrites_nested_watches() {
    let w = WatchedDir::new();
    let nested = w.path("d1/inner");
    fs::create_dir_all(&nested).unwrap();
    assert!(w.wait_kind(EventKind::Created, &nested).is_some());

    fs::rename(w.path("d1"), w.path("d2")).unwrap();
    assert!(w.wait_kind(EventKind::Moved, &w.path("d1")).is_some());

    let file = w.path("d2/inner/deep.txt");
    fs::write(&file, b"x").unwrap();
    let event = w
        .wait_for(|e| e.kind == EventKind::Created && e.source.ends_with("deep.txt"))
        .expect("create inside moved subtree");
    assert_eq!(event.source, file);
}

#[test]
fn test_recreated_directory_after_move_out_is_watched() {
    let w = WatchedDir::new();
    let outside = TempDir::new().unwrap();
    let dir = w.path("sub");
    fs::create_dir(&dir).unwrap();
    assert!(w.wait_kind(EventKind::Created, &dir).is_some());

    let gone = outside.path().join("sub");
    fs::rename(&dir, &gone).unwrap();
    fs::create_dir(&dir).unwrap();
    assert!(w.wait_kind(EventKind::Created, &dir).is_some());
    assert!(w.wait_kind(EventKind::Deleted, &dir).is_some());

    let file = dir.join("file");
    fs::write(&file, b"x").unwrap();
    fs::write(gone.join("late.txt"), b"x").unwrap();
    assert!(w.wait_kind(EventKind::Created, &file).is_some());

    let events = w.collect_for(Duration::from_millis(500));
    assert!(
        events.iter().all(|e| !e.source.ends_with("late.txt")),
        "unexpected events: {:?}",
        events
    );
}

#[test]
fn test_directory_moved_out_is_forgotten() {
    let w = WatchedDir::new();
    let outside = TempDir::new().unwrap();
    let dir = w.path("sub");
    fs::create_dir(&dir).unwrap();
    assert!(w.wait_kind(EventKind::Created, &dir).is_some());

    let gone = outside.path().join("sub");
    fs::rename(&dir, &gone).unwrap();
    assert!(w.wait_kind(EventKind::Deleted, &dir).is_some());

    fs::write(gone.join("late.txt"), b"x").unwrap();
    let events = w.collect_for(Duration::from_millis(500));
    assert!(events.is_empty(), "unexpected events: {:?}", events);
}

#[test]
fn test_mtime_change_is_attribute_change() {
    let w = WatchedDir::new();
    let file = w.path("stamp.txt");
    fs::write(&file, b"x").unwrap();
    assert!(w.wait_kind(EventKind::Created, &file).is_some());

    filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000_000, 0)).unwrap();
    assert!(w.wait_kind(EventKind::AttributeChanged, &file).is_some());
}

#[test]
fn test_existing_subdirectories_are_watched() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("a/b")).unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    let monitor = Monitor::start_with_config(dir.path(), "famTest", common::quick_config(), tx)
        .unwrap();

    let file = dir.path().join("a/b/deep.txt");
    fs::write(&file, b"x").unwrap();
    let event = rx.recv_timeout(common::EVENT_TIMEOUT).unwrap();
    assert_eq!(event, ChangeEvent::created(&file));
    monitor.stop();
}

#[test]
fn test_no_delivery_after_stop() {
    let dir = TempDir::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);

    let monitor = Monitor::start(dir.path(), "famTest", move |_ev: ChangeEvent| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    monitor.stop();

    let before = count.load(Ordering::SeqCst);
    for i in 0..5 {
        fs::write(dir.path().join(format!("f{}", i)), b"x").unwrap();
    }
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(count.load(Ordering::SeqCst), before);
}

#[test]
fn test_stop_during_burst_with_slow_handler() {
    let dir = TempDir::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);

    let monitor = Monitor::start_with_config(
        dir.path(),
        "famTest",
        common::quick_config(),
        move |_ev: ChangeEvent| {
            let _ = started_tx.try_send(());
            thread::sleep(Duration::from_millis(50));
            c.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();

    let root = dir.path().to_path_buf();
    let writer = thread::spawn(move || {
        for i in 0..50 {
            fs::write(root.join(format!("burst{}", i)), b"x").unwrap();
        }
    });

    started_rx.recv_timeout(common::EVENT_TIMEOUT).unwrap();
    let begun = Instant::now();
    monitor.stop();
    assert!(begun.elapsed() < Duration::from_secs(3));

    let after_stop = count.load(Ordering::SeqCst);
    writer.join().unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), after_stop);
}

#[test]
fn test_stop_with_undrained_bounded_channel() {
    let dir = TempDir::new().unwrap();
    let config = famwatch::MonitorConfig {
        kill_timeout_ms: 1_000,
        ..common::quick_config()
    };
    let (tx, rx) = crossbeam_channel::bounded(1);
    let monitor = Monitor::start_with_config(dir.path(), "famTest", config, tx).unwrap();

    for i in 0..5 {
        fs::write(dir.path().join(format!("f{}", i)), b"x").unwrap();
    }
    // Let the backend fill the channel and block on the next send
    thread::sleep(Duration::from_millis(300));

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let stopper = thread::spawn(move || {
        monitor.stop();
        let _ = done_tx.send(());
    });

    assert!(
        done_rx.recv_timeout(Duration::from_secs(4)).is_ok(),
        "stop did not return"
    );
    stopper.join().unwrap();
    drop(rx);
}

#[test]
fn test_quit_handle_stops_backend() {
    let mut w = WatchedDir::new();
    let handle = w.monitor.as_ref().unwrap().quit_handle();

    handle.request_quit();
    assert!(handle.is_quitting());
    assert!(w.monitor.as_ref().unwrap().is_quitting());
    assert!(w.monitor.as_ref().unwrap().take_error().is_none());
    w.stop();
}

#[test]
fn test_event_display_format() {
    let w = WatchedDir::new();
    let file = w.path("shown.txt");
    fs::write(&file, b"x").unwrap();

    let event = w.wait_kind(EventKind::Created, &file).unwrap();
    let line = event.to_string();
    assert!(line.starts_with("famEvent type: created"), "{}", line);
    assert!(line.contains("shown.txt"), "{}", line);
}
