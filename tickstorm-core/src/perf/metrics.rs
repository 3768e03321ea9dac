//! Lock-Free Optimizer Counters
//!
//! Cache-aligned atomic counters updated from the tick thread and read by
//! monitoring. All counters use relaxed ordering.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache-aligned wrapper so neighbouring counters never share a line
#[repr(C, align(64))]
#[derive(Default)]
pub struct CacheAligned<T> {
    inner: T,
}

impl<T> CacheAligned<T> {
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> &T {
        &self.inner
    }
}

type Counter = CacheAligned<AtomicU64>;

#[inline(always)]
fn bump(c: &Counter, by: u64) {
    c.get().fetch_add(by, Ordering::Relaxed);
}

#[inline(always)]
fn read(c: &Counter) -> u64 {
    c.get().load(Ordering::Relaxed)
}

/// Counters of the performance optimizer
#[derive(Default)]
pub struct OptimizerMetrics {
    /// Batches decided on the calling thread
    inline_batches: Counter,
    /// Batches fanned out to the worker pool
    parallel_batches: Counter,
    /// Sub-batches submitted across all parallel batches
    sub_batches: Counter,
    /// Sub-batches that panicked, timed out or could not be queued
    worker_failures: Counter,
    /// Actionable decisions returned
    decisions: Counter,
    ticks_recorded: Counter,
    /// Cumulative recorded tick time
    total_tick_ns: Counter,
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn inc_inline(&self) {
        bump(&self.inline_batches, 1);
    }

    #[inline(always)]
    pub fn inc_parallel(&self, sub_batches: u64) {
        bump(&self.parallel_batches, 1);
        bump(&self.sub_batches, sub_batches);
    }

    #[inline(always)]
    pub fn inc_worker_failures(&self, n: u64) {
        bump(&self.worker_failures, n);
    }

    #[inline(always)]
    pub fn add_decisions(&self, n: u64) {
        bump(&self.decisions, n);
    }

    #[inline(always)]
    pub fn record_tick(&self, tick_ns: u64) {
        bump(&self.ticks_recorded, 1);
        bump(&self.total_tick_ns, tick_ns);
    }

    pub fn snapshot(&self) -> OptimizerSnapshot {
        OptimizerSnapshot {
            inline_batches: read(&self.inline_batches),
            parallel_batches: read(&self.parallel_batches),
            sub_batches: read(&self.sub_batches),
            worker_failures: read(&self.worker_failures),
            decisions: read(&self.decisions),
            ticks_recorded: read(&self.ticks_recorded),
            total_tick_ns: read(&self.total_tick_ns),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.inline_batches,
            &self.parallel_batches,
            &self.sub_batches,
            &self.worker_failures,
            &self.decisions,
            &self.ticks_recorded,
            &self.total_tick_ns,
        ] {
            c.get().store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of `OptimizerMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerSnapshot {
    pub inline_batches: u64,
    pub parallel_batches: u64,
    pub sub_batches: u64,
    pub worker_failures: u64,
    pub decisions: u64,
    pub ticks_recorded: u64,
    pub total_tick_ns: u64,
}

impl OptimizerSnapshot {
    pub fn avg_tick_ms(&self) -> f64 {
        if self.ticks_recorded == 0 {
            return 0.0;
        }
        self.total_tick_ns as f64 / self.ticks_recorded as f64 / 1_000_000.0
    }

    /// Average sub-batches per parallel batch
    pub fn fan_out(&self) -> f64 {
        if self.parallel_batches == 0 {
            return 0.0;
        }
        self.sub_batches as f64 / self.parallel_batches as f64
    }

    /// Worker failures per submitted sub-batch
    pub fn failure_rate(&self) -> f64 {
        if self.sub_batches == 0 {
            return 0.0;
        }
        self.worker_failures as f64 / self.sub_batches as f64
    }
}
