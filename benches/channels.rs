//! Ring throughput benchmarks: uncontended operation cost per variant.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use seakutils::channel::{mpmc, mpsc, spsc};

const BATCH: u64 = 1_024;

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(BATCH));

    group.bench_function("fill_then_drain", |b| {
        let ring = spsc::Channel::<u64>::with_capacity(BATCH as usize);
        let mut tx = ring.sender();
        let mut rx = ring.receiver();
        b.iter(|| {
            for i in 0..BATCH {
                tx.try_send(i).unwrap();
            }
            for _ in 0..BATCH {
                black_box(rx.try_recv().unwrap());
            }
        });
    });

    group.bench_function("ping", |b| {
        let ring = spsc::Channel::<u64>::with_capacity(8);
        let mut tx = ring.sender();
        let mut rx = ring.receiver();
        b.iter(|| {
            for i in 0..BATCH {
                tx.try_send(i).unwrap();
                black_box(rx.try_recv().unwrap());
            }
        });
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");
    group.throughput(Throughput::Elements(BATCH));

    group.bench_function("fill_then_drain", |b| {
        let ring = mpsc::Channel::<u64>::with_capacity(BATCH as usize);
        let tx = ring.sender();
        let mut rx = ring.receiver();
        b.iter(|| {
            for i in 0..BATCH {
                tx.send(i).unwrap();
            }
            for _ in 0..BATCH {
                black_box(rx.try_recv().unwrap());
            }
        });
    });

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc");
    group.throughput(Throughput::Elements(BATCH));

    group.bench_function("ping", |b| {
        let ring = mpmc::Channel::<u64>::with_capacity(8);
        let tx = ring.sender();
        let rx = ring.receiver();
        b.iter(|| {
            for i in 0..BATCH {
                tx.send(i).unwrap();
                black_box(rx.recv().unwrap());
            }
        });
    });

    group.bench_function("fill_then_drain", |b| {
        let ring = mpmc::Channel::<u64>::with_capacity(BATCH as usize);
        let tx = ring.sender();
        let rx = ring.receiver();
        b.iter(|| {
            for i in 0..BATCH {
                tx.send(i).unwrap();
            }
            for _ in 0..BATCH {
                black_box(rx.recv().unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpsc, bench_mpmc);
criterion_main!(benches);
