// Burst benchmark: queue dispatch vs. one thread per call.
//
// The queue number includes full construction and shutdown, like a
// worst-case short-lived use; in production the queue outlives the
// application's bursts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use thread_call::CallQueue;

const QUEUE_CALLS: usize = 10_000_000;
const SPAWN_CALLS: usize = 20_000;

static CALLS: AtomicU64 = AtomicU64::new(0);

fn do_work() {
    CALLS.fetch_add(1, Ordering::Relaxed);
}

fn bench_queue() {
    CALLS.store(0, Ordering::Relaxed);
    let start = Instant::now();

    let q = CallQueue::new();
    for _ in 0..QUEUE_CALLS {
        q.call(do_work, ());
    }
    q.join();
    let caps = q.buffer_capacities();
    drop(q);

    let elapsed = start.elapsed();
    println!("call queue:");
    println!("  Calls: {}", CALLS.load(Ordering::Relaxed));
    println!("  Time: {:?}", elapsed);
    println!(
        "  Throughput: {:.2} Mops/s",
        QUEUE_CALLS as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
    println!(
        "  Latency: {:.2} ns/op",
        elapsed.as_nanos() as f64 / QUEUE_CALLS as f64
    );
    println!("  Buffer sizes: {} KB + {} KB", caps[0] / 1024, caps[1] / 1024);
}

fn bench_spawn() {
    CALLS.store(0, Ordering::Relaxed);
    let start = Instant::now();

    for _ in 0..SPAWN_CALLS {
        thread::spawn(do_work).join().unwrap();
    }

    let elapsed = start.elapsed();
    println!("\nthread::spawn per call:");
    println!("  Calls: {}", CALLS.load(Ordering::Relaxed));
    println!("  Time: {:?}", elapsed);
    println!(
        "  Latency: {:.2} ns/op",
        elapsed.as_nanos() as f64 / SPAWN_CALLS as f64
    );
}

fn main() {
    println!("Burst dispatch benchmark");
    println!();

    bench_queue();
    bench_spawn();
}
