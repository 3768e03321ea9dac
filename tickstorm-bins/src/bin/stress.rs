//! Multi-simulation load generator
//!
//! Runs several simulations in one TPS mode, ticking them in parallel on
//! the blocking pool, and reports per-second throughput. Liquidation
//! cascades are triggered periodically in STRESS and HFT.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tickstorm_bins::common::{
    init_logging, install_panic_handler, print_stats, spawn_metrics_server, CommonArgs,
};
use tickstorm_core::prelude::*;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive many simulations at high throughput")]
struct StressArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Number of concurrent simulations
    #[arg(short = 'n', long, default_value = "4")]
    simulations: usize,

    /// TPS mode for every simulation
    #[arg(short, long, default_value = "HFT")]
    mode: String,

    /// Speed multiplier for every simulation
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Trigger a liquidation cascade every N ticks; 0 disables
    #[arg(long, default_value = "50")]
    cascade_every: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = StressArgs::parse();
    let cfg = args.common.load_config()?;
    init_logging(&cfg)?;
    install_panic_handler();

    info!("=== Tickstorm: stress run ===");
    let tick_interval = Duration::from_millis(cfg.simulation.tick_interval_ms);
    let registry = Arc::new(SimulationRegistry::new(cfg.clone())?);
    let metrics_task = spawn_metrics_server(&cfg, &registry)?;
    let flusher = registry.broadcast().spawn_flush_task();

    let mut ids = Vec::with_capacity(args.simulations);
    for _ in 0..args.simulations {
        let id = registry.create(SimulationParameters {
            speed: args.speed,
            ..Default::default()
        })?;
        registry.set_tps_mode(&id, &args.mode)?;
        registry.start(&id)?;
        ids.push(id);
    }
    info!(
        simulations = ids.len(),
        mode = %args.mode,
        hft = registry.optimizer_stats().hft_simulations,
        "simulations started"
    );

    let run_for = Duration::from_secs(args.common.duration_secs);
    let started = Instant::now();
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick_no = 0u64;
    let mut window_start = Instant::now();
    let mut window_orders = 0usize;

    while started.elapsed() < run_for {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }
        tick_no += 1;

        if args.cascade_every > 0 && tick_no % args.cascade_every == 0 {
            for id in &ids {
                match registry.trigger_liquidation_cascade(id) {
                    Ok(report) => info!(
                        simulation = %id,
                        orders = report.order_count,
                        value = report.total_value,
                        "liquidation cascade"
                    ),
                    Err(e) => warn!(simulation = %id, "cascade refused: {}", e),
                }
            }
        }

        let mut ticks = JoinSet::new();
        for id in ids.iter().cloned() {
            let reg = Arc::clone(&registry);
            ticks.spawn_blocking(move || reg.advance(&id));
        }
        while let Some(joined) = ticks.join_next().await {
            match joined? {
                Ok(report) => window_orders += report.tick.processed,
                Err(e) => warn!("tick failed: {}", e),
            }
        }

        let window = window_start.elapsed();
        if window >= Duration::from_secs(1) {
            info!(
                orders_per_sec = (window_orders as f64 / window.as_secs_f64()) as u64,
                avg_tick_ms = registry.optimizer_stats().avg_tick_ms,
                "throughput"
            );
            window_start = Instant::now();
            window_orders = 0;
        }
    }

    print_stats(&registry);
    for id in &ids {
        registry.delete(id)?;
    }
    flusher.abort();
    if let Some(task) = metrics_task {
        task.abort();
    }
    Ok(())
}
