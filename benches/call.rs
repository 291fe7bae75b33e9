//! Benchmarks for the enqueue hot path.
//!
//! Measures per-call enqueue cost for the typed, raw and blob forms,
//! plus the burst-then-join round trip. The producer is pinned to a
//! core so slot contention with the worker stays realistic.

use core_affinity::CoreId;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use thread_call::CallQueue;

static SINK: AtomicU64 = AtomicU64::new(0);

fn sink(v: u64) {
    SINK.fetch_add(v, Ordering::Relaxed);
}

unsafe fn raw_sink(data: *mut u8) {
    let v = data.cast::<u64>().read_unaligned();
    SINK.fetch_add(v, Ordering::Relaxed);
}

fn bench_enqueue(c: &mut Criterion) {
    core_affinity::set_for_current(CoreId { id: 0 });

    let mut group = c.benchmark_group("enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("call", |b| {
        let q = CallQueue::with_capacity(1 << 20);
        b.iter(|| {
            q.call(sink, (black_box(1u64),));
        });
        q.join();
    });

    group.bench_function("raw_call", |b| {
        let q = CallQueue::with_capacity(1 << 20);
        b.iter(|| {
            // Safety: raw_sink reads the packed (u64,) payload.
            unsafe { q.raw_call(raw_sink, (black_box(1u64),)) };
        });
        q.join();
    });

    group.bench_function("raw_copy", |b| {
        let q = CallQueue::with_capacity(1 << 20);
        let packet = [1u8; 8];
        b.iter(|| {
            // Safety: raw_sink reads 8 payload bytes.
            unsafe { q.raw_copy(raw_sink, black_box(&packet)) };
        });
        q.join();
    });

    group.finish();
}

fn bench_burst_join(c: &mut Criterion) {
    const BURST: usize = 1024;

    core_affinity::set_for_current(CoreId { id: 0 });

    let mut group = c.benchmark_group("burst");
    group.throughput(Throughput::Elements(BURST as u64));

    group.bench_function("call_x1024_join", |b| {
        let q = CallQueue::with_capacity(1 << 20);
        b.iter(|| {
            for _ in 0..BURST {
                q.call(sink, (black_box(1u64),));
            }
            q.join();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_burst_join);
criterion_main!(benches);
