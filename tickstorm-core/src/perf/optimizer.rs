//! Performance optimizer
//!
//! Registry-wide owner of the decision worker pool. Per tick it picks the
//! inline or parallel path, sizes sub-batches from a rolling window of tick
//! durations, and applies HFT scaling while at least one simulation runs in
//! HFT mode.

use super::cpu::recommended_workers;
use super::metrics::{OptimizerMetrics, OptimizerSnapshot};
use super::worker_pool::WorkerPool;
use crate::config::constants::FRAME_BUDGET_MS;
use crate::config::{BatchConfig, DecisionConfig, WorkerConfig};
use crate::engine::{decide_batch, DecisionInput, MarketSnapshot, TraderDecision};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one decision pass
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Actionable decisions, in sub-batch order
    pub decisions: Vec<TraderDecision>,
    pub parallel: bool,
    pub sub_batches: usize,
    /// Sub-batches whose results were discarded
    pub failed_sub_batches: usize,
}

struct AdaptiveState {
    batch_size: usize,
    window: VecDeque<f64>,
}

struct HftState {
    simulations: usize,
    pool_multiplier: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerStats {
    pub workers: usize,
    pub batch_size: usize,
    pub hft_simulations: usize,
    pub pool_capacity_multiplier: usize,
    pub avg_tick_ms: f64,
    pub counters: OptimizerSnapshot,
}

pub struct PerformanceOptimizer {
    workers_cfg: WorkerConfig,
    batching: BatchConfig,
    pool: WorkerPool,
    base_workers: usize,
    adaptive: Mutex<AdaptiveState>,
    hft: Mutex<HftState>,
    metrics: OptimizerMetrics,
}

impl PerformanceOptimizer {
    pub fn new(workers: &WorkerConfig, batching: &BatchConfig) -> Self {
        let size = workers
            .worker_count
            .unwrap_or_else(|| recommended_workers(workers.max_workers))
            .min(workers.max_workers);
        Self::with_worker_pool(workers, batching, WorkerPool::new("decision-worker", size))
    }

    /// Build around an existing pool
    pub fn with_worker_pool(workers: &WorkerConfig, batching: &BatchConfig, pool: WorkerPool) -> Self {
        let base_workers = pool.size();
        if base_workers == 0 {
            warn!("no decision workers available, all batches run inline");
        }
        Self {
            workers_cfg: workers.clone(),
            batching: batching.clone(),
            pool,
            base_workers,
            adaptive: Mutex::new(AdaptiveState {
                batch_size: batching.initial_batch_size,
                window: VecDeque::with_capacity(batching.tick_window),
            }),
            hft: Mutex::new(HftState {
                simulations: 0,
                pool_multiplier: 1,
            }),
            metrics: OptimizerMetrics::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    pub fn batch_size(&self) -> usize {
        self.adaptive.lock().batch_size
    }

    pub fn pool_capacity_multiplier(&self) -> usize {
        self.hft.lock().pool_multiplier
    }

    pub fn should_parallelize(&self, speed: f64, traders: usize) -> bool {
        self.pool.size() > 0
            && speed >= self.workers_cfg.parallel_speed_threshold
            && traders >= self.workers_cfg.min_parallel_batch
    }

    /// Decide every input, inline or on the pool
    ///
    /// Never fails: sub-batches lost to panics or the deadline contribute no
    /// decisions and are counted.
    pub fn process_decisions<R: Rng + ?Sized>(
        &self,
        inputs: Vec<DecisionInput>,
        snapshot: &MarketSnapshot,
        cfg: &DecisionConfig,
        speed: f64,
        rng: &mut R,
    ) -> BatchOutcome {
        if inputs.is_empty() {
            return BatchOutcome::default();
        }

        if !self.should_parallelize(speed, inputs.len()) {
            let decisions = decide_batch(&inputs, snapshot, cfg, rng.gen());
            self.metrics.inc_inline();
            self.metrics.add_decisions(decisions.len() as u64);
            return BatchOutcome {
                decisions,
                parallel: false,
                sub_batches: 1,
                failed_sub_batches: 0,
            };
        }

        let workers = self.pool.size().max(1);
        let chunk_size = self
            .batch_size()
            .min(inputs.len().div_ceil(workers))
            .max(1);

        let mut chunks = Vec::with_capacity(inputs.len().div_ceil(chunk_size));
        let mut rest = inputs;
        while !rest.is_empty() {
            let tail = rest.split_off(chunk_size.min(rest.len()));
            chunks.push((rest, rng.gen::<u64>()));
            rest = tail;
        }
        let sub_batches = chunks.len();

        let shared = Arc::new((snapshot.clone(), cfg.clone()));
        let run = Arc::new(move |(chunk, seed): (Vec<DecisionInput>, u64)| {
            decide_batch(&chunk, &shared.0, &shared.1, seed)
        });
        let timeout = Duration::from_millis(self.workers_cfg.batch_timeout_ms);

        let mut decisions = Vec::new();
        let mut failed = 0usize;
        for result in self.pool.scatter_gather(chunks, run, timeout) {
            match result {
                Ok(mut batch) => decisions.append(&mut batch),
                Err(e) => {
                    warn!(error = %e, "decision sub-batch dropped");
                    failed += 1;
                }
            }
        }

        self.metrics.inc_parallel(sub_batches as u64);
        self.metrics.inc_worker_failures(failed as u64);
        self.metrics.add_decisions(decisions.len() as u64);
        debug!(sub_batches, chunk_size, failed, decisions = decisions.len(), "parallel decisions");

        BatchOutcome {
            decisions,
            parallel: true,
            sub_batches,
            failed_sub_batches: failed,
        }
    }

    /// Feed one tick duration into the adaptive batch sizer
    pub fn record_tick_duration(&self, elapsed: Duration) {
        self.metrics.record_tick(elapsed.as_nanos() as u64);

        let ms = elapsed.as_secs_f64() * 1_000.0;
        let mut state = self.adaptive.lock();
        if state.window.len() >= self.batching.tick_window.max(1) {
            state.window.pop_front();
        }
        state.window.push_back(ms);
        let avg = state.window.iter().sum::<f64>() / state.window.len() as f64;

        let before = state.batch_size;
        if avg < self.batching.headroom_ratio * FRAME_BUDGET_MS {
            state.batch_size = (state.batch_size + self.batching.growth_step).min(self.batching.max_batch_size);
        } else if avg > FRAME_BUDGET_MS {
            state.batch_size = state
                .batch_size
                .saturating_sub(self.batching.growth_step)
                .max(self.batching.min_batch_size);
        }
        if state.batch_size != before {
            debug!(from = before, to = state.batch_size, avg_ms = avg, "batch size adjusted");
        }
    }

    /// A simulation entered HFT; scaling applies on the first one
    pub fn enable_high_frequency(&self) {
        let mut hft = self.hft.lock();
        hft.simulations += 1;
        if hft.simulations == 1 {
            hft.pool_multiplier = 2;
            let target = (self.base_workers * 2).min(self.workers_cfg.max_workers * 2);
            let workers = self.pool.resize(target);
            info!(workers, pool_multiplier = 2, "high-frequency scaling enabled");
        }
    }

    /// A simulation left HFT; scaling reverts after the last one
    pub fn disable_high_frequency(&self) {
        let mut hft = self.hft.lock();
        if hft.simulations == 0 {
            warn!("disable_high_frequency called with no HFT simulations");
            return;
        }
        hft.simulations -= 1;
        if hft.simulations == 0 {
            hft.pool_multiplier = 1;
            let workers = self.pool.resize(self.base_workers);
            info!(workers, "high-frequency scaling disabled");
        }
    }

    pub fn hft_simulations(&self) -> usize {
        self.hft.lock().simulations
    }

    pub fn stats(&self) -> OptimizerStats {
        let counters = self.metrics.snapshot();
        let (hft_simulations, pool_capacity_multiplier) = {
            let hft = self.hft.lock();
            (hft.simulations, hft.pool_multiplier)
        };
        OptimizerStats {
            workers: self.pool.size(),
            batch_size: self.batch_size(),
            hft_simulations,
            pool_capacity_multiplier,
            avg_tick_ms: counters.avg_tick_ms(),
            counters,
        }
    }
}
