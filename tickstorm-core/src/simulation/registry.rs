//! Simulation registry: the control surface of the stream core
//!
//! Owns every process-level resource (optimizer, analyzer, broadcast
//! service, metrics, pool tag source) and one `Mutex<SimulationState>` per
//! id. The map guard is always released before a state lock is taken, so
//! different ids never contend; ticks for one id are serialized by its lock
//! and their events are broadcast before the lock is released.

use crate::analysis::{MarketAnalysis, MarketAnalyzer};
use crate::broadcast::{BroadcastService, DeliveryReport, Endpoint, EndpointId, EventFrame, EventKind, StreamEvent};
use crate::config::CoreConfig;
use crate::core::errors::{SimError, SimResult};
use crate::core::tps_fsm::{ModeProfile, ModeTransition, TpsMode};
use crate::core::types::SimulationId;
use crate::market::{ActiveScenario, ExternalMarketMetrics, ScenarioSpec};
use crate::monitoring::StreamMetrics;
use crate::perf::{OptimizerStats, PerformanceOptimizer, PoolTagSource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::state::{validate_speed, PoolHealth, SimulationParameters, SimulationSnapshot, SimulationState, POSITION_POOL, TRADE_POOL};
use super::tick::{self, TickContext, TickOutcome};

/// Result of one `advance` call
#[derive(Debug)]
pub struct TickReport {
    /// Tick outcome; its events have been handed to the broadcast service
    pub tick: TickOutcome,
    /// One entry per emitted event, in emission order
    pub deliveries: Vec<DeliveryReport>,
    pub sim_time: u64,
    pub price: f64,
    pub mode: TpsMode,
}

impl TickReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().map(|d| d.delivered).sum()
    }
}

/// Outcome of a liquidation cascade
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    /// Orders the queue accepted
    pub order_count: usize,
    /// Orders refused by a full queue
    pub rejected: usize,
    /// Long exposure the cascade was sized against
    pub exposure_usd: f64,
    pub total_value: f64,
}

pub struct SimulationRegistry {
    cfg: CoreConfig,
    table: [ModeProfile; 4],
    simulations: DashMap<SimulationId, Arc<Mutex<SimulationState>>>,
    optimizer: Arc<PerformanceOptimizer>,
    analyzer: MarketAnalyzer,
    broadcast: Arc<BroadcastService>,
    metrics: Arc<StreamMetrics>,
    tags: PoolTagSource,
    seeds: Mutex<StdRng>,
    next_id: AtomicU64,
}

impl SimulationRegistry {
    pub fn new(cfg: CoreConfig) -> SimResult<Self> {
        let metrics = StreamMetrics::new().map_err(|e| SimError::ResourceExhaustion {
            resource: "metrics",
            detail: e.to_string(),
        })?;
        Self::with_metrics(cfg, Arc::new(metrics))
    }

    /// Build on a caller-owned metrics registry, e.g. one already exported
    pub fn with_metrics(cfg: CoreConfig, metrics: Arc<StreamMetrics>) -> SimResult<Self> {
        cfg.validate()?;
        let table = cfg.mode_profiles()?;
        let optimizer = Arc::new(PerformanceOptimizer::new(&cfg.workers, &cfg.batching));
        let analyzer = MarketAnalyzer::new(cfg.analysis.clone());
        let broadcast = Arc::new(BroadcastService::new(cfg.broadcast.clone(), Arc::clone(&metrics)));
        let seeds = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            workers = optimizer.worker_count(),
            batch_size = optimizer.batch_size(),
            seeded = cfg.rng_seed.is_some(),
            "simulation registry initialized"
        );

        Ok(Self {
            cfg,
            table,
            simulations: DashMap::new(),
            optimizer,
            analyzer,
            broadcast,
            metrics,
            tags: PoolTagSource::new(),
            seeds: Mutex::new(seeds),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn broadcast(&self) -> &Arc<BroadcastService> {
        &self.broadcast
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    pub fn optimizer(&self) -> &Arc<PerformanceOptimizer> {
        &self.optimizer
    }

    pub fn optimizer_stats(&self) -> OptimizerStats {
        self.optimizer.stats()
    }

    pub fn len(&self) -> usize {
        self.simulations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulations.is_empty()
    }

    pub fn ids(&self) -> Vec<SimulationId> {
        let mut ids: Vec<SimulationId> = self.simulations.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &SimulationId) -> bool {
        self.simulations.contains_key(id)
    }

    // ---- lifecycle ----

    /// Create a stopped simulation under a generated id
    pub fn create(&self, params: SimulationParameters) -> SimResult<SimulationId> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.create_with_id(SimulationId::new(format!("sim-{}", n)), params)
    }

    pub fn create_with_id(&self, id: SimulationId, params: SimulationParameters) -> SimResult<SimulationId> {
        params.validate(self.cfg.simulation.max_speed)?;
        match self.simulations.entry(id.clone()) {
            Entry::Occupied(_) => Err(SimError::state("create", format!("simulation {} already exists", id))),
            Entry::Vacant(slot) => {
                let seed = self.seeds.lock().gen::<u64>();
                let state = SimulationState::new(id.clone(), params, &self.cfg, self.table.clone(), &self.tags, seed);
                info!(
                    simulation = %id,
                    symbol = %state.params.symbol,
                    traders = state.traders.len(),
                    seed,
                    "simulation created"
                );
                slot.insert(Arc::new(Mutex::new(state)));
                self.metrics.active_simulations.inc();
                self.metrics.set_mode(&id, TpsMode::Normal);
                Ok(id)
            }
        }
    }

    pub fn start(&self, id: &SimulationId) -> SimResult<()> {
        self.with_state(id, |reg, state| {
            if state.has_ended() {
                return Err(SimError::state("start", "simulation has ended; reset it first"));
            }
            if state.running {
                return Err(SimError::state("start", "simulation is already running"));
            }
            state.running = true;
            state.paused = false;
            info!(simulation = %id, "simulation started");
            reg.emit_status(state, "started");
            Ok(())
        })
    }

    pub fn pause(&self, id: &SimulationId) -> SimResult<()> {
        self.with_state(id, |reg, state| {
            if !state.running || state.paused {
                return Err(SimError::state("pause", format!("simulation is {}", state.status())));
            }
            state.paused = true;
            info!(simulation = %id, "simulation paused");
            reg.emit_status(state, "paused");
            Ok(())
        })
    }

    pub fn resume(&self, id: &SimulationId) -> SimResult<()> {
        self.with_state(id, |reg, state| {
            if !state.running || !state.paused {
                return Err(SimError::state("resume", format!("simulation is {}", state.status())));
            }
            state.paused = false;
            info!(simulation = %id, "simulation resumed");
            reg.emit_status(state, "resumed");
            Ok(())
        })
    }

    /// Rebuild from the original parameters and seed, keeping the pools
    pub fn reset(&self, id: &SimulationId) -> SimResult<()> {
        self.with_state(id, |reg, state| {
            reg.leave_high_frequency(state);
            state.release_all();

            let fresh = SimulationState::new(
                id.clone(),
                state.params.clone(),
                &reg.cfg,
                reg.table.clone(),
                &reg.tags,
                state.seed(),
            );
            let old = std::mem::replace(state, fresh);
            state.trade_pool = old.trade_pool;
            state.position_pool = old.position_pool;
            state.apply_pool_multiplier(reg.optimizer.pool_capacity_multiplier());

            reg.analyzer.forget(id);
            reg.metrics.set_mode(id, state.mode());
            info!(simulation = %id, "simulation reset");
            reg.emit_status(state, "reset");
            Ok(())
        })
    }

    /// Remove a simulation, releasing its pools and per-id resources
    pub fn delete(&self, id: &SimulationId) -> SimResult<()> {
        let (_, sim) = self
            .simulations
            .remove(id)
            .ok_or_else(|| SimError::NotFound { id: id.to_string() })?;

        // waits for an in-flight tick of this id
        let mut state = sim.lock();
        self.leave_high_frequency(&mut state);
        state.release_all();
        state.running = false;
        self.emit_status(&state, "deleted");
        drop(state);

        self.broadcast.remove_channel(id);
        self.analyzer.forget(id);
        self.metrics.forget_simulation(id, &[TRADE_POOL, POSITION_POOL]);
        self.metrics.active_simulations.dec();
        info!(simulation = %id, "simulation deleted");
        Ok(())
    }

    pub fn set_speed(&self, id: &SimulationId, speed: f64) -> SimResult<()> {
        validate_speed(speed, self.cfg.simulation.max_speed)?;
        self.with_state(id, |reg, state| {
            state.speed = speed;
            debug!(simulation = %id, speed, "speed changed");
            reg.emit_status(state, "speed_changed");
            Ok(())
        })
    }

    /// Switch TPS mode by name; unknown names are a validation error
    pub fn set_tps_mode(&self, id: &SimulationId, mode: &str) -> SimResult<ModeTransition> {
        let mode: TpsMode = mode.parse()?;
        self.with_state(id, |reg, state| Ok(reg.switch_mode(state, mode)))
    }

    pub fn trigger_liquidation_cascade(&self, id: &SimulationId) -> SimResult<CascadeReport> {
        self.with_state(id, |reg, state| {
            let floor = reg.cfg.generator.cascade_min_orders as f64 * reg.cfg.generator.cascade_unit_usd;
            let exposure_usd = state.long_exposure().max(floor);
            let mode = state.mode();
            let price = state.current_price;
            let now = state.current_time;
            let outcome = state
                .generator
                .liquidation_cascade(mode, exposure_usd, price, now, &mut state.rng)?;

            let report = CascadeReport {
                order_count: outcome.queued.len(),
                rejected: outcome.rejected,
                exposure_usd,
                total_value: outcome.queued.iter().map(|o| o.value).sum(),
            };
            debug!(
                simulation = %id,
                orders = report.order_count,
                rejected = report.rejected,
                exposure_usd,
                "cascade queued"
            );
            reg.emit(
                id,
                StreamEvent::from_payload(EventKind::ExternalMarketMetrics, now, state.external_metrics()),
            );
            Ok(report)
        })
    }

    /// Start a scenario, replacing any active one
    pub fn apply_scenario(&self, id: &SimulationId, spec: ScenarioSpec) -> SimResult<()> {
        spec.validate()?;
        self.with_state(id, |reg, state| {
            if let Some(active) = state.scenario.take() {
                let event = tick::finish_scenario(state, active, &reg.optimizer, "replaced");
                reg.metrics.set_mode(id, state.mode());
                reg.emit(id, event);
            }

            let previous_mode = spec.tps_mode.map(|_| state.mode());
            if let Some(mode) = spec.tps_mode {
                reg.switch_mode(state, mode);
            }
            let scenario = ActiveScenario::start(spec, state.current_time, previous_mode);
            info!(simulation = %id, scenario = %scenario.spec.name, "scenario applied");
            reg.emit(id, StreamEvent::from_payload(EventKind::ScenarioApplied, state.current_time, &scenario));
            state.scenario = Some(scenario);
            Ok(())
        })
    }

    /// End the active scenario; false when none was running
    pub fn clear_scenario(&self, id: &SimulationId) -> SimResult<bool> {
        self.with_state(id, |reg, state| {
            let Some(active) = state.scenario.take() else {
                return Ok(false);
            };
            let event = tick::finish_scenario(state, active, &reg.optimizer, "cleared");
            reg.metrics.set_mode(id, state.mode());
            reg.emit(id, event);
            Ok(true)
        })
    }

    // ---- ticking ----

    pub fn advance(&self, id: &SimulationId) -> SimResult<TickReport> {
        self.advance_at(id, Instant::now())
    }

    /// Run one tick against an explicit wall clock
    pub fn advance_at(&self, id: &SimulationId, now: Instant) -> SimResult<TickReport> {
        let sim = self.get(id)?;
        let mut state = sim.lock();
        let ctx = TickContext {
            cfg: &self.cfg,
            optimizer: &self.optimizer,
            analyzer: &self.analyzer,
        };
        let mut outcome = tick::advance(&mut state, &ctx, now);

        let mut deliveries = Vec::with_capacity(outcome.events.len());
        if outcome.advanced {
            self.record_tick(&state, &outcome);
            self.broadcast.set_actual_tps(id, state.external_metrics().actual_tps);
            for event in outcome.events.drain(..) {
                deliveries.push(self.broadcast.broadcast_at(id, event, now));
            }
        }

        Ok(TickReport {
            tick: outcome,
            deliveries,
            sim_time: state.current_time,
            price: state.current_price,
            mode: state.mode(),
        })
    }

    // ---- subscriptions ----

    pub fn subscribe(&self, id: &SimulationId, endpoint: Arc<dyn Endpoint>) -> SimResult<()> {
        self.ensure_exists(id)?;
        self.broadcast.subscribe(id, endpoint);
        Ok(())
    }

    pub fn subscribe_channel(
        &self,
        id: &SimulationId,
        buffer: usize,
    ) -> SimResult<(EndpointId, mpsc::Receiver<EventFrame>)> {
        self.ensure_exists(id)?;
        Ok(self.broadcast.subscribe_channel(id, buffer))
    }

    pub fn unsubscribe(&self, id: &SimulationId, endpoint: EndpointId) -> bool {
        self.broadcast.unsubscribe(id, endpoint)
    }

    // ---- views ----

    pub fn snapshot(&self, id: &SimulationId) -> SimResult<SimulationSnapshot> {
        self.with_state(id, |_, state| Ok(state.snapshot()))
    }

    pub fn external_metrics(&self, id: &SimulationId) -> SimResult<ExternalMarketMetrics> {
        self.with_state(id, |_, state| Ok(state.external_metrics().clone()))
    }

    /// Latest market analysis, computed now if none is cached
    pub fn analysis(&self, id: &SimulationId) -> SimResult<MarketAnalysis> {
        self.with_state(id, |reg, state| {
            let input = tick::analysis_input(state, &reg.analyzer);
            Ok(reg.analyzer.analyze(id, &input))
        })
    }

    pub fn pool_health(&self, id: &SimulationId) -> SimResult<PoolHealth> {
        self.with_state(id, |_, state| Ok(state.pool_health()))
    }

    // ---- internals ----

    fn get(&self, id: &SimulationId) -> SimResult<Arc<Mutex<SimulationState>>> {
        self.simulations
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SimError::NotFound { id: id.to_string() })
    }

    fn ensure_exists(&self, id: &SimulationId) -> SimResult<()> {
        if self.simulations.contains_key(id) {
            Ok(())
        } else {
            Err(SimError::NotFound { id: id.to_string() })
        }
    }

    fn with_state<T>(
        &self,
        id: &SimulationId,
        f: impl FnOnce(&Self, &mut SimulationState) -> SimResult<T>,
    ) -> SimResult<T> {
        let sim = self.get(id)?;
        let mut state = sim.lock();
        f(self, &mut state)
    }

    fn switch_mode(&self, state: &mut SimulationState, mode: TpsMode) -> ModeTransition {
        let transition = state.tps.set_mode(mode, &self.optimizer);
        if transition.changed() {
            state.apply_pool_multiplier(self.optimizer.pool_capacity_multiplier());
            self.metrics.set_mode(&state.id, mode);
            info!(
                simulation = %state.id,
                from = %transition.previous_mode,
                to = %transition.new_mode,
                target_tps = transition.target_tps,
                "TPS mode changed"
            );
        }
        transition
    }

    /// Drop this simulation's share of HFT scaling
    fn leave_high_frequency(&self, state: &mut SimulationState) {
        if state.mode().is_high_frequency() {
            state.tps.set_mode(TpsMode::Normal, &self.optimizer);
        }
    }

    fn record_tick(&self, state: &SimulationState, outcome: &TickOutcome) {
        let m = &self.metrics;
        let sim = state.id.as_str();
        m.ticks_total.inc();
        m.tick_duration_ms.observe(outcome.elapsed.as_secs_f64() * 1_000.0);
        m.record_orders("generated", outcome.generation.generated as u64);
        m.record_orders("rejected", outcome.generation.rejected as u64);
        m.record_orders("processed", outcome.processed as u64);
        if outcome.failed_sub_batches > 0 {
            m.worker_batch_failures_total.inc_by(outcome.failed_sub_batches as u64);
        }
        let external = state.external_metrics();
        m.actual_tps.with_label_values(&[sim]).set(external.actual_tps);
        m.queue_depth.with_label_values(&[sim]).set(external.queue_depth as i64);
        // a scenario ending inside the tick restores its previous mode
        m.set_mode(&state.id, state.mode());
        let health = state.pool_health();
        m.set_pool(&state.id, &health.trades);
        m.set_pool(&state.id, &health.positions);
    }

    fn emit(&self, id: &SimulationId, event: StreamEvent) {
        self.broadcast.broadcast_event(id, event);
    }

    fn emit_status(&self, state: &SimulationState, change: &str) {
        let event = StreamEvent::new(
            EventKind::SimulationStatus,
            state.current_time,
            json!({
                "status": state.status(),
                "change": change,
                "speed": state.speed,
                "currentTime": state.current_time,
                "tpsMode": state.mode(),
            }),
        );
        self.emit(&state.id, event);
    }
}
