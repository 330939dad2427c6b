//! Scheduler dispatch benchmarks: independent fan and chained jobs.

use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use seakutils::{JobRef, Scheduler, SchedulerConfig, SchedulerPool};

const JOBS: usize = 256;

fn bump(ctx: *mut ()) {
    // SAFETY: the benchmark keeps the counter alive.
    let counter = unsafe { &*(ctx as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::Relaxed);
}

fn bench_scheduler(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerPool::with_config(SchedulerConfig {
        workers: 4,
        region_capacity: 4096,
        max_regions: 4,
    }));
    let counter = AtomicUsize::new(0);
    let ctx = &counter as *const AtomicUsize as *mut ();

    let spawn_retry = |func| loop {
        // SAFETY: counter outlives the scheduler.
        if let Some(job) = unsafe { scheduler.spawn(func, ctx) } {
            break job;
        }
        std::hint::spin_loop();
    };

    let mut group = c.benchmark_group("scheduler");
    group.throughput(Throughput::Elements(JOBS as u64));

    group.bench_function("independent_fan", |b| {
        b.iter(|| {
            for _ in 0..JOBS {
                scheduler.wait(spawn_retry(bump));
            }
            scheduler.drain();
        });
    });

    group.bench_function("single_chain", |b| {
        b.iter(|| {
            let jobs: Vec<JobRef> = (0..JOBS).map(|_| spawn_retry(bump)).collect();
            scheduler.chain(&jobs);
            scheduler.drain();
        });
    });

    group.finish();
    scheduler.shutdown();
}

criterion_group!(benches, bench_scheduler);
criterion_main!(benches);
