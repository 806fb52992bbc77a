//! Core performance benchmarks for famwatch-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use famwatch_core::{CorrelationTable, MoveRing, WatchTable};
use std::path::{Path, PathBuf};

fn bench_correlation(c: &mut Criterion) {
    c.bench_function("correlation_insert_take_1k", |b| {
        b.iter(|| {
            let mut table = CorrelationTable::new();
            for cookie in 0..1_000u32 {
                table.insert(cookie, PathBuf::from("/w/file"), cookie as u64);
            }
            for cookie in 0..1_000u32 {
                black_box(table.take(&cookie));
            }
        });
    });

    c.bench_function("correlation_sweep_1k", |b| {
        b.iter(|| {
            let mut table = CorrelationTable::new();
            for cookie in 0..1_000u32 {
                table.insert(cookie, PathBuf::from("/w/file"), cookie as u64);
            }
            black_box(table.sweep(10_000, 1_000));
        });
    });
}

fn bench_watch_table(c: &mut Criterion) {
    let mut table = WatchTable::new();
    for i in 0..2_000i32 {
        table.insert(i, &Path::new("/w/tree").join(format!("d{}/sub", i % 50)).join(i.to_string()));
    }

    c.bench_function("watch_table_rename_prefix", |b| {
        b.iter(|| {
            table.rename_prefix(Path::new("/w/tree/d7"), Path::new("/w/tree/x7"));
            table.rename_prefix(Path::new("/w/tree/x7"), Path::new("/w/tree/d7"));
        });
    });
}

fn bench_move_ring(c: &mut Criterion) {
    c.bench_function("move_ring_insert_expire", |b| {
        b.iter(|| {
            let mut ring = MoveRing::new(1_000);
            for inode in 0..500u64 {
                ring.insert(inode, PathBuf::from("/w/file"), inode * 4);
            }
            black_box(ring.expire(10_000));
        });
    });
}

criterion_group!(benches, bench_correlation, bench_watch_table, bench_move_ring);
criterion_main!(benches);
