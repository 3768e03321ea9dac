//! External order flow
//!
//! Each tick the generator draws a jittered number of synthetic orders from
//! the active mode's archetype mix, queues them by priority, then executes up
//! to the mode's processing capacity against the simulated price.
//!
//! ```text
//!   desired = target × dt ± jitter (+ carried fraction)
//!   depth > threshold ⇒ desired × max(threshold / depth, min_factor)
//!   queue: higher priority first, FIFO within a priority, ≤ max_queue_depth
//!   capacity = min(target × dt × headroom, max_processed_per_tick)
//! ```

use super::archetypes::{traits, CASCADE_PRIORITY};
use crate::config::GeneratorConfig;
use crate::core::errors::{SimError, SimResult};
use crate::core::tps_fsm::{ModeProfile, TpsMode};
use crate::core::types::{Archetype, Trade, TradeAction, Trend};
use crate::perf::pools::{ObjectPool, PoolObject};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Share of the large order's value a front-runner commits
const FRONT_RUN_VALUE_SHARE: f64 = 0.2;

/// Synthetic order awaiting execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalOrder {
    pub id: u64,
    pub archetype: Archetype,
    pub action: TradeAction,
    pub price: f64,
    pub quantity: f64,
    pub value: f64,
    pub priority: u8,
    pub created_at: u64,
    /// Id of the large order this one front-runs
    pub front_run_of: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

/// Throughput view of one tick window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMarketMetrics {
    pub mode: TpsMode,
    /// Target orders per second of the active mode
    pub current_tps: u32,
    /// Orders executed per second over the last tick
    pub actual_tps: f64,
    pub queue_depth: usize,
    /// Total executed since creation or reset
    pub processed_orders: u64,
    /// Total refused by the queue bound
    pub rejected_orders: u64,
    pub avg_processing_time_us: f64,
    pub dominant_archetype: Option<Archetype>,
    pub market_sentiment: Sentiment,
    /// 0..=100
    pub liquidation_risk: f64,
    /// Share of desired orders admitted last tick
    pub admission_factor: f64,
}

impl Default for ExternalMarketMetrics {
    fn default() -> Self {
        Self {
            mode: TpsMode::Normal,
            current_tps: TpsMode::Normal.default_target_tps(),
            actual_tps: 0.0,
            queue_depth: 0,
            processed_orders: 0,
            rejected_orders: 0,
            avg_processing_time_us: 0.0,
            dominant_archetype: None,
            market_sentiment: Sentiment::Neutral,
            liquidation_risk: 0.0,
            admission_factor: 1.0,
        }
    }
}

/// Cascade orders split by whether the queue took them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeOutcome {
    /// Orders now waiting in the queue
    pub queued: Vec<ExternalOrder>,
    /// Orders refused because the queue was full
    pub rejected: usize,
}

/// What one `generate` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Orders drawn from the archetype mix
    pub generated: usize,
    /// Extra MEV orders spawned by large orders
    pub front_runs: usize,
    /// Orders refused because the queue was full
    pub rejected: usize,
}

#[derive(Debug)]
struct QueuedOrder {
    seq: u64,
    order: ExternalOrder,
}

impl PartialEq for QueuedOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedOrder {}

impl PartialOrd for QueuedOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOrder {
    // max-heap: higher priority wins, then the earlier sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .priority
            .cmp(&other.order.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct ExternalOrderGenerator {
    cfg: GeneratorConfig,
    queue: BinaryHeap<QueuedOrder>,
    next_seq: u64,
    next_order_id: u64,
    carry: f64,
    admission_factor: f64,
    processed_total: u64,
    rejected_total: u64,
    metrics: ExternalMarketMetrics,
}

fn archetype_slot(a: Archetype) -> usize {
    Archetype::ALL.iter().position(|x| *x == a).unwrap_or(0)
}

impl ExternalOrderGenerator {
    pub fn new(cfg: GeneratorConfig) -> Self {
        Self {
            cfg,
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_order_id: 1,
            carry: 0.0,
            admission_factor: 1.0,
            processed_total: 0,
            rejected_total: 0,
            metrics: ExternalMarketMetrics::default(),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> &ExternalMarketMetrics {
        &self.metrics
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected_total
    }

    /// Drop every queued order and zero the totals
    pub fn clear(&mut self) {
        self.queue.clear();
        self.carry = 0.0;
        self.admission_factor = 1.0;
        self.processed_total = 0;
        self.rejected_total = 0;
        self.metrics = ExternalMarketMetrics::default();
    }

    /// Multiplier applied to desired counts at the current queue depth
    pub fn backpressure_factor(&self) -> f64 {
        let depth = self.queue.len();
        if depth <= self.cfg.backpressure_threshold {
            return 1.0;
        }
        (self.cfg.backpressure_threshold as f64 / depth as f64).max(self.cfg.min_admission_factor)
    }

    /// Orders to create this tick, before backpressure
    fn desired_count<R: Rng + ?Sized>(&mut self, target_tps: u32, tick_ms: u64, rng: &mut R) -> usize {
        let base = target_tps as f64 * tick_ms as f64 / 1_000.0;
        let jitter = self.cfg.count_jitter;
        let raw = (base * (1.0 + rng.gen_range(-jitter..=jitter)) + self.carry).max(0.0);
        let whole = raw.floor();
        self.carry = raw - whole;
        whole as usize
    }

    /// Orders executed per tick for a mode
    pub fn processing_capacity(&self, target_tps: u32, tick_ms: u64) -> usize {
        let per_tick = target_tps as f64 * tick_ms as f64 / 1_000.0 * self.cfg.processing_headroom;
        (per_tick.ceil() as usize).min(self.cfg.max_processed_per_tick)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    /// Queue one order; false (and counted) when the queue is full
    pub fn enqueue(&mut self, order: ExternalOrder) -> bool {
        if self.queue.len() >= self.cfg.max_queue_depth {
            self.rejected_total += 1;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedOrder { seq, order });
        true
    }

    fn make_order<R: Rng + ?Sized>(
        &mut self,
        archetype: Archetype,
        mid: f64,
        trend: Trend,
        now_ms: u64,
        rng: &mut R,
    ) -> ExternalOrder {
        let t = traits(archetype);
        let action = t.sample_action(trend, rng);
        let value = t.sample_value(rng);
        let price = t.limit_price(mid, action);
        ExternalOrder {
            id: self.next_id(),
            archetype,
            action,
            price,
            quantity: value / price,
            value,
            priority: t.priority,
            created_at: now_ms,
            front_run_of: None,
        }
    }

    /// Draw this tick's orders into the queue
    pub fn generate<R: Rng + ?Sized>(
        &mut self,
        profile: &ModeProfile,
        mid: f64,
        trend: Trend,
        now_ms: u64,
        tick_ms: u64,
        rng: &mut R,
    ) -> GenerationReport {
        let desired = self.desired_count(profile.target_tps(), tick_ms, rng);
        self.admission_factor = self.backpressure_factor();
        let count = if self.admission_factor < 1.0 {
            (desired as f64 * self.admission_factor).round() as usize
        } else {
            desired
        };

        let mut report = GenerationReport::default();
        for _ in 0..count {
            let archetype = profile.sample_archetype(rng);
            let order = self.make_order(archetype, mid, trend, now_ms, rng);
            report.generated += 1;

            let front_run = (order.value >= self.cfg.front_run_min_value
                && rng.gen::<f64>() < self.cfg.front_run_probability)
                .then(|| {
                    let value = order.value * FRONT_RUN_VALUE_SHARE;
                    let price = traits(Archetype::MevBot).limit_price(mid, order.action);
                    ExternalOrder {
                        id: 0,
                        archetype: Archetype::MevBot,
                        action: order.action,
                        price,
                        quantity: value / price,
                        value,
                        priority: order.priority.saturating_add(1),
                        created_at: now_ms,
                        front_run_of: Some(order.id),
                    }
                });

            if !self.enqueue(order) {
                report.rejected += 1;
            }
            if let Some(mut mev) = front_run {
                mev.id = self.next_id();
                report.front_runs += 1;
                if !self.enqueue(mev) {
                    report.rejected += 1;
                }
            }
        }

        if self.admission_factor < 1.0 {
            debug!(
                desired,
                admitted = count,
                depth = self.queue.len(),
                factor = self.admission_factor,
                "backpressure applied"
            );
        }
        report
    }

    /// Execute queued orders up to the mode's capacity
    ///
    /// Each execution moves `price` by its impact. Trades come from `pool`;
    /// the caller owns them afterwards.
    pub fn process_tick(
        &mut self,
        profile: &ModeProfile,
        tick_ms: u64,
        price: &mut f64,
        now_ms: u64,
        pool: &mut ObjectPool<Trade>,
        next_trade_id: &mut u64,
    ) -> Vec<PoolObject<Trade>> {
        let capacity = self.processing_capacity(profile.target_tps(), tick_ms);
        let started = Instant::now();
        let mut trades = Vec::with_capacity(capacity.min(self.queue.len()));
        let mut per_archetype = [0u64; 6];
        let (mut buy_value, mut sell_value) = (0.0, 0.0);

        while trades.len() < capacity {
            let Some(QueuedOrder { order, .. }) = self.queue.pop() else {
                break;
            };
            // impact in percent: market_depth_usd moves price 1%
            let impact = order.action.sign() * order.value / self.cfg.market_depth_usd;
            let exec_price = *price;
            *price = (*price * (1.0 + impact / 100.0)).max(f64::MIN_POSITIVE);

            let mut trade = pool.acquire();
            *trade = Trade {
                id: *next_trade_id,
                timestamp: now_ms,
                trader_id: None,
                archetype: Some(order.archetype),
                action: order.action,
                price: exec_price,
                quantity: order.value / exec_price,
                value: order.value,
                impact,
            };
            *next_trade_id += 1;

            per_archetype[archetype_slot(order.archetype)] += 1;
            match order.action {
                TradeAction::Buy => buy_value += order.value,
                TradeAction::Sell => sell_value += order.value,
            }
            trades.push(trade);
        }

        let elapsed_us = started.elapsed().as_secs_f64() * 1_000_000.0;
        self.processed_total += trades.len() as u64;
        self.refresh_metrics(profile, tick_ms, trades.len(), elapsed_us, per_archetype, buy_value, sell_value);
        trades
    }

    #[allow(clippy::too_many_arguments)]
    fn refresh_metrics(
        &mut self,
        profile: &ModeProfile,
        tick_ms: u64,
        processed: usize,
        elapsed_us: f64,
        per_archetype: [u64; 6],
        buy_value: f64,
        sell_value: f64,
    ) {
        let tick_s = (tick_ms as f64 / 1_000.0).max(f64::EPSILON);
        let total_value = buy_value + sell_value;
        let sentiment = if total_value <= 0.0 {
            Sentiment::Neutral
        } else if buy_value / total_value > 0.55 {
            Sentiment::Bullish
        } else if buy_value / total_value < 0.45 {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        };
        let dominant = per_archetype
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .max_by_key(|(_, n)| **n)
            .map(|(i, _)| Archetype::ALL[i]);

        let mode = profile.mode();
        let base_risk = match mode {
            TpsMode::Normal => 5.0,
            TpsMode::Burst => 15.0,
            TpsMode::Stress => 40.0,
            TpsMode::Hft => 30.0,
        };
        let sell_share = if total_value > 0.0 { sell_value / total_value } else { 0.5 };
        let queue_share = self.queue.len() as f64 / self.cfg.max_queue_depth.max(1) as f64;
        let risk = (base_risk + (sell_share - 0.5).max(0.0) * 80.0 + queue_share * 20.0).clamp(0.0, 100.0);

        self.metrics = ExternalMarketMetrics {
            mode,
            current_tps: profile.target_tps(),
            actual_tps: processed as f64 / tick_s,
            queue_depth: self.queue.len(),
            processed_orders: self.processed_total,
            rejected_orders: self.rejected_total,
            avg_processing_time_us: if processed == 0 { 0.0 } else { elapsed_us / processed as f64 },
            dominant_archetype: dominant,
            market_sentiment: sentiment,
            liquidation_risk: risk,
            admission_factor: self.admission_factor,
        };
    }

    /// Dump a share of long exposure as panic sells
    ///
    /// Only STRESS and HFT allow cascades. Orders are queued at top priority;
    /// the outcome holds copies of the queued ones and counts the refused.
    pub fn liquidation_cascade<R: Rng + ?Sized>(
        &mut self,
        mode: TpsMode,
        long_exposure_usd: f64,
        price: f64,
        now_ms: u64,
        rng: &mut R,
    ) -> SimResult<CascadeOutcome> {
        if !mode.allows_liquidation_cascade() {
            return Err(SimError::state(
                "trigger_liquidation_cascade",
                format!("liquidation cascades require STRESS or HFT mode, current mode is {}", mode),
            ));
        }
        if !(long_exposure_usd.is_finite() && long_exposure_usd > 0.0) {
            return Err(SimError::validation("long exposure must be a positive amount"));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(SimError::validation("cascade price must be positive"));
        }

        let count = ((long_exposure_usd / self.cfg.cascade_unit_usd).ceil() as usize)
            .clamp(self.cfg.cascade_min_orders, self.cfg.cascade_max_orders);
        let total = long_exposure_usd * self.cfg.cascade_exposure_fraction;
        let per_order = total / count as f64;
        let panic = traits(Archetype::PanicSeller);

        let mut outcome = CascadeOutcome {
            queued: Vec::with_capacity(count),
            rejected: 0,
        };
        for _ in 0..count {
            let value = per_order * rng.gen_range(0.9..=1.1);
            let limit = panic.limit_price(price, TradeAction::Sell);
            let order = ExternalOrder {
                id: self.next_id(),
                archetype: Archetype::PanicSeller,
                action: TradeAction::Sell,
                price: limit,
                quantity: value / limit,
                value,
                priority: CASCADE_PRIORITY,
                created_at: now_ms,
                front_run_of: None,
            };
            if self.enqueue(order.clone()) {
                outcome.queued.push(order);
            } else {
                outcome.rejected += 1;
            }
        }

        self.metrics.queue_depth = self.queue.len();
        self.metrics.rejected_orders = self.rejected_total;
        if outcome.rejected > 0 {
            warn!(rejected = outcome.rejected, count, "cascade orders rejected by full queue");
        }
        info!(
            %mode,
            queued = outcome.queued.len(),
            exposure = long_exposure_usd,
            notional = total,
            "liquidation cascade triggered"
        );
        Ok(outcome)
    }
}
