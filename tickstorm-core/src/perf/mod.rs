//! Performance layer
//!
//! - **Object pools**: owner-tagged free lists for trades and positions
//! - **Worker pool**: bounded threads with a deadline-guarded fan-in
//! - **Optimizer**: inline vs parallel decisions, adaptive batch size, HFT scaling
//! - **Lock-free metrics**: cache-aligned atomic counters

pub mod cpu;
pub mod metrics;
pub mod optimizer;
pub mod pools;
pub mod worker_pool;

// Re-exports for convenience
pub use cpu::{num_cores, recommended_workers};
pub use metrics::{CacheAligned, OptimizerMetrics, OptimizerSnapshot};
pub use optimizer::{BatchOutcome, OptimizerStats, PerformanceOptimizer};
pub use pools::{
    ObjectPool, PoolLimits, PoolObject, PoolStats, PoolTag, PoolTagSource, ReleaseOutcome, Reusable,
};
pub use worker_pool::WorkerPool;
