//! Semaphore and TPS benchmarks using criterion.
//!
//! Run with: cargo bench --bench sync_bench

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use uthread_runtime::{Runtime, TPS_SIZE};

/// Benchmark uncontended semaphore operations
fn bench_sem_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("sem_uncontended");
    let rt = Runtime::new();
    let sem = rt.sem_create(1);

    group.bench_function("down_up", |b| {
        b.iter(|| {
            rt.sem_down(sem).unwrap();
            rt.sem_up(sem).unwrap();
        });
    });

    group.bench_function("try_down_up", |b| {
        b.iter(|| {
            black_box(rt.sem_try_down(sem).unwrap());
            rt.sem_up(sem).unwrap();
        });
    });

    group.bench_function("getvalue", |b| {
        b.iter(|| black_box(rt.sem_getvalue(sem).unwrap()));
    });

    group.finish();
}

/// Benchmark a blocking handoff between two threads
fn bench_sem_ping_pong(c: &mut Criterion) {
    let mut group = c.benchmark_group("sem_ping_pong");
    const ROUNDS: u64 = 1000;
    group.throughput(Throughput::Elements(ROUNDS));

    group.bench_function("two_threads", |b| {
        b.iter(|| {
            let rt = Arc::new(Runtime::new());
            let ping = rt.sem_create(0);
            let pong = rt.sem_create(0);
            let partner = {
                let rt = Arc::clone(&rt);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        rt.sem_down(ping).unwrap();
                        rt.sem_up(pong).unwrap();
                    }
                })
            };
            for _ in 0..ROUNDS {
                rt.sem_up(ping).unwrap();
                rt.sem_down(pong).unwrap();
            }
            partner.join().unwrap();
        });
    });

    group.finish();
}

/// Benchmark TPS reads and writes of varying size
fn bench_tps_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("tps_copy");
    let rt = Runtime::new();
    rt.tps_init(false).unwrap();
    rt.tps_create().unwrap();

    for size in [16usize, 256, TPS_SIZE] {
        let data = vec![0x5Au8; size];
        let mut buf = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("write", size), &size, |b, &size| {
            b.iter(|| rt.tps_write(0, size, black_box(&data)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("read", size), &size, |b, &size| {
            b.iter(|| rt.tps_read(0, size, black_box(&mut buf)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark clone followed by the copy-on-write fork
fn bench_tps_clone_fork(c: &mut Criterion) {
    let mut group = c.benchmark_group("tps_clone_fork");
    let rt = Arc::new(Runtime::new());
    rt.tps_init(false).unwrap();
    rt.tps_create().unwrap();
    let parent = rt.current_thread();

    // Clone and fork from a single worker thread so its identity stays fixed.
    group.bench_function("clone_write_destroy", |b| {
        b.iter_custom(|iters| {
            let rt = Arc::clone(&rt);
            thread::spawn(move || {
                let start = std::time::Instant::now();
                for _ in 0..iters {
                    rt.tps_clone(parent).unwrap();
                    rt.tps_write(0, 1, b"x").unwrap();
                    rt.tps_destroy().unwrap();
                }
                start.elapsed()
            })
            .join()
            .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sem_uncontended,
    bench_sem_ping_pong,
    bench_tps_copy,
    bench_tps_clone_fork,
);
criterion_main!(benches);
