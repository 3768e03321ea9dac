//! Owner-tagged Object Pools
//!
//! Pre-allocated free lists for the records churned every tick (`Trade`,
//! `TraderPosition`). Each pool carries a `PoolTag` handed out by its owner;
//! every object it hands out is stamped with that tag, and `release` refuses
//! objects stamped by any other pool.
//!
//! A pool belongs to exactly one simulation and is only touched from that
//! simulation's tick, so it is a plain `Vec` behind `&mut self`.
//!
//! # Example
//! ```
//! use tickstorm_core::perf::pools::{ObjectPool, PoolLimits, PoolTag, Reusable};
//!
//! #[derive(Default)]
//! struct Slot { value: u64 }
//! impl Reusable for Slot {
//!     fn reset(&mut self) { self.value = 0; }
//! }
//!
//! let mut pool = ObjectPool::<Slot>::new("slots", PoolTag::new(1), 16, PoolLimits::default());
//! let mut obj = pool.acquire();
//! obj.value = 42;
//! pool.release(obj);
//! assert_eq!(pool.stats().leak, 0);
//! ```

use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Objects handed back to a pool are scrubbed through this hook
pub trait Reusable {
    fn reset(&mut self);
}

/// Identity of one pool instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PoolTag(u64);

impl PoolTag {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Hands out unique pool tags; owned by the registry
#[derive(Debug, Default)]
pub struct PoolTagSource {
    next: AtomicU64,
}

impl PoolTagSource {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_tag(&self) -> PoolTag {
        PoolTag(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A pooled value stamped with the tag of the pool that produced it
#[derive(Debug)]
pub struct PoolObject<T> {
    owner: PoolTag,
    inner: T,
}

impl<T> PoolObject<T> {
    pub fn owner(&self) -> PoolTag {
        self.owner
    }

    pub fn get(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Deref for PoolObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for PoolObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Health thresholds for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Outstanding objects tolerated before the pool reports unhealthy
    pub max_leak: u64,
    /// Foreign releases tolerated before the pool reports unhealthy
    pub max_cross_pool_attempts: u64,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_leak: 10_000,
            max_cross_pool_attempts: 0,
        }
    }
}

/// What `release` did with the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Reset and pushed onto the free list
    Returned,
    /// Accepted but the free list was full, object dropped
    DroppedFull,
    /// Object belongs to another pool; nothing changed except the counter
    Refused,
}

/// Bounded free-list allocator
pub struct ObjectPool<T: Reusable + Default> {
    name: &'static str,
    tag: PoolTag,
    free: Vec<T>,
    capacity: usize,
    limits: PoolLimits,
    acquired: u64,
    released: u64,
    created: u64,
    reused: u64,
    cross_pool_attempts: u64,
    dropped_full: u64,
}

impl<T: Reusable + Default> ObjectPool<T> {
    /// Create a pool with `capacity` objects pre-allocated
    pub fn new(name: &'static str, tag: PoolTag, capacity: usize, limits: PoolLimits) -> Self {
        let mut free = Vec::with_capacity(capacity);
        free.extend((0..capacity).map(|_| T::default()));
        debug!(pool = name, tag = tag.raw(), capacity, "object pool created");

        Self {
            name,
            tag,
            free,
            capacity,
            limits,
            acquired: 0,
            released: 0,
            created: capacity as u64,
            reused: 0,
            cross_pool_attempts: 0,
            dropped_full: 0,
        }
    }

    /// Take a pooled object, constructing a fresh one if the free list is empty
    pub fn acquire(&mut self) -> PoolObject<T> {
        self.acquired += 1;
        let value = match self.free.pop() {
            Some(v) => {
                self.reused += 1;
                v
            }
            None => {
                self.created += 1;
                T::default()
            }
        };
        PoolObject {
            owner: self.tag,
            inner: value,
        }
    }

    /// Return an object; refuses objects stamped by another pool
    pub fn release(&mut self, obj: PoolObject<T>) -> ReleaseOutcome {
        if obj.owner != self.tag {
            self.cross_pool_attempts += 1;
            warn!(
                pool = self.name,
                tag = self.tag.raw(),
                foreign = obj.owner.raw(),
                "refused release of object owned by another pool"
            );
            return ReleaseOutcome::Refused;
        }

        self.released += 1;
        let mut value = obj.inner;
        if self.free.len() >= self.capacity {
            self.dropped_full += 1;
            return ReleaseOutcome::DroppedFull;
        }
        value.reset();
        self.free.push(value);
        ReleaseOutcome::Returned
    }

    /// Empty the free list and reset bookkeeping under memory pressure
    ///
    /// Objects still outstanding keep their tag and are still accepted on
    /// release. They stay counted as acquired, so the leak figure is
    /// unchanged by a reclaim.
    pub fn force_reclaim(&mut self) {
        let freed = self.free.len();
        let outstanding = self.acquired.saturating_sub(self.released);
        self.free.clear();
        self.free.shrink_to_fit();
        self.acquired = outstanding;
        self.released = 0;
        self.created = 0;
        self.reused = 0;
        self.cross_pool_attempts = 0;
        self.dropped_full = 0;
        warn!(pool = self.name, freed, outstanding, "object pool force-reclaimed");
    }

    /// Resize the free-list bound; shrinking drops surplus idle objects
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.capacity {
            return;
        }
        if capacity < self.free.len() {
            self.free.truncate(capacity);
        } else {
            let missing = capacity.saturating_sub(self.capacity);
            self.free.reserve(missing);
            self.free.extend((0..missing).map(|_| T::default()));
            self.created += missing as u64;
        }
        debug!(pool = self.name, from = self.capacity, to = capacity, "pool resized");
        self.capacity = capacity;
    }

    pub fn tag(&self) -> PoolTag {
        self.tag
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idle objects currently on the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        let leak = self.acquired.saturating_sub(self.released);
        let utilization = if self.capacity == 0 {
            0.0
        } else {
            (leak as f64 / self.capacity as f64).min(1.0)
        };
        let healthy = leak <= self.limits.max_leak
            && self.cross_pool_attempts <= self.limits.max_cross_pool_attempts;

        PoolStats {
            name: self.name,
            capacity: self.capacity,
            available: self.free.len(),
            acquired: self.acquired,
            released: self.released,
            created: self.created,
            reused: self.reused,
            leak,
            cross_pool_attempts: self.cross_pool_attempts,
            dropped_full: self.dropped_full,
            utilization,
            healthy,
        }
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub name: &'static str,
    pub capacity: usize,
    pub available: usize,
    pub acquired: u64,
    pub released: u64,
    pub created: u64,
    pub reused: u64,
    /// acquired − released
    pub leak: u64,
    pub cross_pool_attempts: u64,
    pub dropped_full: u64,
    pub utilization: f64,
    pub healthy: bool,
}

impl PoolStats {
    /// Check if pool is near exhaustion (>90% of capacity outstanding)
    pub fn is_near_exhaustion(&self) -> bool {
        self.utilization > 0.9
    }

    /// Share of acquisitions served from the free list
    pub fn hit_rate(&self) -> f64 {
        if self.acquired == 0 {
            return 1.0;
        }
        (self.reused as f64 / self.acquired as f64).min(1.0)
    }
}
