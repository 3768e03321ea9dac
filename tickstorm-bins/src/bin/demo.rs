//! Single-simulation demo stream
//!
//! Runs one simulation on a wall-clock tick, subscribes a channel endpoint
//! and logs what a live client would receive. A flash-crash scenario is
//! applied halfway through the run.

use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tickstorm_bins::common::{
    init_logging, install_panic_handler, print_stats, spawn_metrics_server, CommonArgs,
};
use tickstorm_core::prelude::*;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream one synthetic market to a local subscriber")]
struct DemoArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Starting TPS mode: NORMAL, BURST, STRESS, HFT
    #[arg(short, long, default_value = "NORMAL")]
    mode: String,

    /// Simulation speed multiplier
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Symbol to simulate
    #[arg(long, default_value = "SYN/USD")]
    symbol: String,

    /// Skip the mid-run flash-crash scenario
    #[arg(long)]
    no_scenario: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DemoArgs::parse();
    let cfg = args.common.load_config()?;
    init_logging(&cfg)?;
    install_panic_handler();

    info!("=== Tickstorm: demo stream ===");
    let tick_interval = Duration::from_millis(cfg.simulation.tick_interval_ms);
    let registry = Arc::new(SimulationRegistry::new(cfg.clone())?);
    let metrics_task = spawn_metrics_server(&cfg, &registry)?;
    let flusher = registry.broadcast().spawn_flush_task();

    let id = registry.create(SimulationParameters {
        symbol: args.symbol.clone(),
        speed: args.speed,
        ..Default::default()
    })?;
    let transition = registry.set_tps_mode(&id, &args.mode)?;
    info!(simulation = %id, mode = %transition.new_mode, target_tps = transition.target_tps, "simulation created");

    let (_endpoint, mut rx) = registry.subscribe_channel(&id, 4_096)?;
    let consumer = tokio::spawn(async move {
        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        while let Some(frame) = rx.recv().await {
            *counts.entry(frame.kind.as_str()).or_default() += 1;
            if frame.kind == EventKind::PriceUpdate {
                debug!(payload = %frame.payload, "price");
            }
        }
        counts
    });

    registry.start(&id)?;
    let run_for = Duration::from_secs(args.common.duration_secs);
    let started = Instant::now();
    let mut scenario_applied = args.no_scenario;
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        if started.elapsed() >= run_for {
            break;
        }
        if !scenario_applied && started.elapsed() >= run_for / 2 {
            registry.apply_scenario(&id, flash_crash())?;
            scenario_applied = true;
            info!(simulation = %id, "flash crash scenario applied");
        }

        let reg = Arc::clone(&registry);
        let tick_id = id.clone();
        let report = tokio::task::spawn_blocking(move || reg.advance(&tick_id)).await??;
        if report.tick.ended {
            info!(simulation = %id, "simulation reached its end time");
            break;
        }
        if report.tick.elapsed > tick_interval {
            warn!(
                elapsed_ms = report.tick.elapsed.as_millis() as u64,
                "tick overran its interval"
            );
        }
    }

    if let Ok(snapshot) = registry.snapshot(&id) {
        info!(
            "{} price={:.4} ticks={} open_positions={} closed={}",
            snapshot.symbol,
            snapshot.current_price,
            snapshot.tick_count,
            snapshot.active_positions.len(),
            snapshot.closed_position_count
        );
    }
    print_stats(&registry);

    registry.delete(&id)?;
    flusher.abort();
    if let Some(task) = metrics_task {
        task.abort();
    }
    let counts = consumer.await?;
    info!("Received events: {}", serde_json::to_string(&counts)?);
    Ok(())
}

fn flash_crash() -> ScenarioSpec {
    ScenarioSpec {
        name: "flash-crash".to_string(),
        duration_ms: 5 * 60_000,
        volatility_multiplier: 4.0,
        drift_per_minute: -0.02,
        tps_mode: Some(TpsMode::Stress),
    }
}
