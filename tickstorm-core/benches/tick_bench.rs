//! Tick Throughput Benchmarks
//!
//! One registry tick per iteration across TPS modes, plus the decision
//! batch on its own. Frame budget is 16.67ms per tick.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tickstorm_core::config::CoreConfig;
use tickstorm_core::engine::{decide_batch, DecisionInput, MarketSnapshot};
use tickstorm_core::simulation::{seed_traders, SimulationParameters, SimulationRegistry};
use tickstorm_core::core::Trend;

fn seeded_config() -> CoreConfig {
    let mut cfg = CoreConfig::default();
    cfg.rng_seed = Some(1);
    cfg
}

/// Benchmark: full tick per TPS mode
fn bench_tick_per_mode(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_tick");
    group.sample_size(50);

    for mode in ["NORMAL", "BURST", "STRESS", "HFT"] {
        let reg = SimulationRegistry::new(seeded_config()).unwrap();
        let id = reg.create(SimulationParameters::default()).unwrap();
        reg.start(&id).unwrap();
        reg.set_tps_mode(&id, mode).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(mode), &id, |b, id| {
            b.iter(|| {
                black_box(reg.advance(id).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark: parallel decisions at high speed
fn bench_tick_parallel_decisions(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_tick_parallel");
    group.sample_size(50);

    let reg = SimulationRegistry::new(seeded_config()).unwrap();
    let id = reg
        .create(SimulationParameters {
            speed: 10.0,
            trader_count: Some(1_000),
            ..Default::default()
        })
        .unwrap();
    reg.start(&id).unwrap();

    group.bench_function("1000_traders_speed_10", |b| {
        b.iter(|| {
            black_box(reg.advance(&id).unwrap());
        });
    });

    group.finish();
}

/// Benchmark: inline decision batch only
fn bench_decide_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide_batch");
    let cfg = CoreConfig::default();

    for n in [118usize, 1_000] {
        let mut rng = StdRng::seed_from_u64(3);
        let inputs: Vec<DecisionInput> = seed_traders(n, &mut rng)
            .into_iter()
            .map(|profile| DecisionInput { profile, position: None })
            .collect();
        let snapshot = MarketSnapshot {
            price_history: vec![100.0, 100.5, 101.0, 101.8, 102.4],
            current_price: 103.0,
            trend: Trend::Bullish,
            timestamp: 0,
        };

        group.bench_with_input(BenchmarkId::from_parameter(n), &inputs, |b, inputs| {
            b.iter(|| {
                black_box(decide_batch(black_box(inputs), &snapshot, &cfg.decisions, 42));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_tick_per_mode,
    bench_tick_parallel_decisions,
    bench_decide_batch
);
criterion_main!(benches);
