//! Common utilities for all binaries
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use tickstorm_core::config::{ConfigProfile, CoreConfig, ProfileName};
use tickstorm_core::monitoring::{MetricsServer, MetricsServerConfig};
use tickstorm_core::simulation::SimulationRegistry;
use tickstorm_core::utils::init_logger;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Common CLI arguments for all binaries
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// JSON configuration file; overrides --profile
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Configuration preset: demo, load-test, soak
    #[arg(short, long, default_value = "demo")]
    pub profile: String,

    /// Log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,

    /// Prometheus exporter address, e.g. 127.0.0.1:9100
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// Fixed RNG seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run for this many wall seconds
    #[arg(short, long, default_value = "30")]
    pub duration_secs: u64,
}

impl CommonArgs {
    /// Resolve the configuration: file, else profile, then CLI overrides
    pub fn load_config(&self) -> Result<CoreConfig> {
        let mut cfg = match &self.config {
            Some(path) => CoreConfig::load(path)?,
            None => {
                let name = ProfileName::parse(&self.profile)
                    .ok_or_else(|| anyhow!("Unknown profile '{}'", self.profile))?;
                ConfigProfile::for_name(name)
            }
        };

        if let Some(level) = &self.log_level {
            cfg.monitoring.log_level = level.clone();
        }
        if self.json_logs {
            cfg.monitoring.json_logs = true;
        }
        if self.metrics_addr.is_some() {
            cfg.monitoring.metrics_addr = self.metrics_addr.clone();
        }
        if self.seed.is_some() {
            cfg.rng_seed = self.seed;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Initialize tracing/logging from the resolved configuration
pub fn init_logging(cfg: &CoreConfig) -> Result<()> {
    init_logger(&cfg.monitoring.log_level, cfg.monitoring.json_logs)
}

/// Install a panic hook that logs through tracing before the default hook runs
pub fn install_panic_handler() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "<no message>".to_string()
        };

        error!(location = %location, message = %message, "PANIC: stream generator crashed");
        default_hook(panic_info);
    }));
}

/// Spawn the Prometheus exporter when an address is configured
pub fn spawn_metrics_server(
    cfg: &CoreConfig,
    registry: &SimulationRegistry,
) -> Result<Option<JoinHandle<()>>> {
    let Some(addr) = &cfg.monitoring.metrics_addr else {
        return Ok(None);
    };
    let server = MetricsServer::new(
        MetricsServerConfig::from_addr(addr)?,
        Arc::clone(registry.metrics()),
    );
    Ok(Some(tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("Metrics server stopped: {:#}", e);
        }
    })))
}

/// Print final statistics
pub fn print_stats(registry: &SimulationRegistry) {
    let optimizer = registry.optimizer_stats();
    let broadcast = registry.broadcast().stats();

    info!("=== Final Statistics ===");
    info!("Simulations: {}", registry.len());
    info!("Workers: {}", optimizer.workers);
    info!("Batch size: {}", optimizer.batch_size);
    info!("Avg tick: {:.3}ms", optimizer.avg_tick_ms);
    info!("Events delivered: {}", broadcast.delivered);
    info!("Events throttled: {}", broadcast.throttled);
    info!("Subscriber failures: {}", broadcast.failures);

    for id in registry.ids() {
        if let Ok(m) = registry.external_metrics(&id) {
            info!(
                "{}: mode={} processed={} rejected={} queue={} actual_tps={:.0}",
                id, m.mode, m.processed_orders, m.rejected_orders, m.queue_depth, m.actual_tps
            );
        }
    }
}
