//! Object Pool Benchmarks
//!
//! Acquire/release cycles against a warm pool versus plain allocation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tickstorm_core::core::Trade;
use tickstorm_core::perf::{ObjectPool, PoolLimits, PoolTagSource};

/// Benchmark: single acquire + release
fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_release");
    group.significance_level(0.01).sample_size(1000);

    let tags = PoolTagSource::new();
    let mut pool: ObjectPool<Trade> = ObjectPool::new("bench", tags.next_tag(), 1_024, PoolLimits::default());

    group.bench_function("warm_pool", |b| {
        b.iter(|| {
            let mut trade = pool.acquire();
            trade.price = black_box(100.0);
            black_box(pool.release(trade));
        });
    });

    group.bench_function("box_allocation", |b| {
        b.iter(|| {
            let mut trade = Box::new(Trade::default());
            trade.price = black_box(100.0);
            black_box(trade);
        });
    });

    group.finish();
}

/// Benchmark: bursts sized like one tick of each TPS mode
fn bench_tick_bursts(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_tick_burst");

    for burst in [3usize, 15, 150, 1_000] {
        let tags = PoolTagSource::new();
        let mut pool: ObjectPool<Trade> = ObjectPool::new("bench", tags.next_tag(), 2_000, PoolLimits::default());
        let mut held = Vec::with_capacity(burst);

        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            b.iter(|| {
                for i in 0..burst {
                    let mut trade = pool.acquire();
                    trade.id = i as u64;
                    held.push(trade);
                }
                for trade in held.drain(..) {
                    black_box(pool.release(trade));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_tick_bursts);
criterion_main!(benches);
