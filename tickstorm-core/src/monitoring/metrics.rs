//! Prometheus metrics for the stream pipeline
//!
//! Provides metrics for:
//! - Ticks (count, duration)
//! - Order flow (generated, processed, rejected, queue depth, actual TPS)
//! - Event delivery (delivered, throttled, superseded, failures)
//! - Resources (pool outstanding objects, worker batch failures)

use crate::core::tps_fsm::TpsMode;
use crate::core::types::SimulationId;
use crate::perf::pools::PoolStats;
use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use tracing::info;

const NAMESPACE: &str = "tickstorm";

pub struct StreamMetrics {
    registry: Registry,

    /// Ticks advanced across all simulations
    pub ticks_total: IntCounter,
    /// Wall time of one tick in milliseconds
    pub tick_duration_ms: Histogram,
    /// External orders by outcome (generated, processed, rejected)
    pub orders_total: IntCounterVec,
    /// Events by type and outcome (delivered, throttled, superseded)
    pub events_total: IntCounterVec,
    /// Endpoint sends that failed and removed the endpoint
    pub delivery_failures_total: IntCounter,
    /// Decision sub-batches lost to panics or the deadline
    pub worker_batch_failures_total: IntCounter,
    /// Outstanding pooled objects per simulation and pool
    pub pool_outstanding: IntGaugeVec,
    /// Foreign releases seen per simulation and pool
    pub pool_cross_pool_attempts: IntGaugeVec,
    pub active_simulations: IntGauge,
    /// TPS mode per simulation as 0 NORMAL, 1 BURST, 2 STRESS, 3 HFT
    pub tps_mode: IntGaugeVec,
    pub actual_tps: GaugeVec,
    pub queue_depth: IntGaugeVec,
    /// Subscribers across all simulations
    pub subscribers: Gauge,
}

impl StreamMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ticks_total = IntCounter::with_opts(
            Opts::new("ticks_total", "Total simulation ticks advanced").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(ticks_total.clone()))?;

        let tick_duration_ms = Histogram::with_opts(
            HistogramOpts::new("tick_duration_ms", "Wall time of one tick in milliseconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 16.67, 25.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(tick_duration_ms.clone()))?;

        let orders_total = IntCounterVec::new(
            Opts::new("orders_total", "External synthetic orders by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Stream events by type and outcome").namespace(NAMESPACE),
            &["type", "outcome"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let delivery_failures_total = IntCounter::with_opts(
            Opts::new("delivery_failures_total", "Failed endpoint sends").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(delivery_failures_total.clone()))?;

        let worker_batch_failures_total = IntCounter::with_opts(
            Opts::new(
                "worker_batch_failures_total",
                "Decision sub-batches that panicked or missed the deadline",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(worker_batch_failures_total.clone()))?;

        let pool_outstanding = IntGaugeVec::new(
            Opts::new("pool_outstanding", "Pooled objects acquired and not yet released")
                .namespace(NAMESPACE),
            &["simulation", "pool"],
        )?;
        registry.register(Box::new(pool_outstanding.clone()))?;

        let pool_cross_pool_attempts = IntGaugeVec::new(
            Opts::new("pool_cross_pool_attempts", "Releases refused for a foreign owner tag")
                .namespace(NAMESPACE),
            &["simulation", "pool"],
        )?;
        registry.register(Box::new(pool_cross_pool_attempts.clone()))?;

        let active_simulations = IntGauge::with_opts(
            Opts::new("active_simulations", "Simulations registered").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(active_simulations.clone()))?;

        let tps_mode = IntGaugeVec::new(
            Opts::new("tps_mode", "TPS mode per simulation (0 NORMAL .. 3 HFT)").namespace(NAMESPACE),
            &["simulation"],
        )?;
        registry.register(Box::new(tps_mode.clone()))?;

        let actual_tps = GaugeVec::new(
            Opts::new("actual_tps", "External orders executed per second").namespace(NAMESPACE),
            &["simulation"],
        )?;
        registry.register(Box::new(actual_tps.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "External orders waiting").namespace(NAMESPACE),
            &["simulation"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let subscribers = Gauge::with_opts(
            Opts::new("subscribers", "Live subscriber endpoints").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(subscribers.clone()))?;

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            ticks_total,
            tick_duration_ms,
            orders_total,
            events_total,
            delivery_failures_total,
            worker_batch_failures_total,
            pool_outstanding,
            pool_cross_pool_attempts,
            active_simulations,
            tps_mode,
            actual_tps,
            queue_depth,
            subscribers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_event(&self, kind: &str, outcome: &str, n: u64) {
        if n > 0 {
            self.events_total.with_label_values(&[kind, outcome]).inc_by(n);
        }
    }

    pub fn record_orders(&self, outcome: &str, n: u64) {
        if n > 0 {
            self.orders_total.with_label_values(&[outcome]).inc_by(n);
        }
    }

    pub fn set_mode(&self, id: &SimulationId, mode: TpsMode) {
        let value = TpsMode::ALL.iter().position(|m| *m == mode).unwrap_or(0) as i64;
        self.tps_mode.with_label_values(&[id.as_str()]).set(value);
    }

    pub fn set_pool(&self, id: &SimulationId, stats: &PoolStats) {
        let labels = [id.as_str(), stats.name];
        self.pool_outstanding.with_label_values(&labels).set(stats.leak as i64);
        self.pool_cross_pool_attempts
            .with_label_values(&labels)
            .set(stats.cross_pool_attempts as i64);
    }

    /// Drop every per-simulation series of a deleted simulation
    pub fn forget_simulation(&self, id: &SimulationId, pools: &[&str]) {
        let sim = id.as_str();
        let _ = self.tps_mode.remove_label_values(&[sim]);
        let _ = self.actual_tps.remove_label_values(&[sim]);
        let _ = self.queue_depth.remove_label_values(&[sim]);
        for pool in pools.iter().copied() {
            let _ = self.pool_outstanding.remove_label_values(&[sim, pool]);
            let _ = self.pool_cross_pool_attempts.remove_label_values(&[sim, pool]);
        }
    }
}
