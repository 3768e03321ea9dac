//! Per-simulation state
//!
//! One `SimulationState` per id, mutated only by the thread holding its
//! registry lock. Trades and positions are pool-managed; everything that
//! leaves the state (snapshots, events, decision inputs) is a plain copy.

use crate::analysis::{Timeframe, TradeWindow};
use crate::config::constants::INTENSITY_BUCKET_MS;
use crate::config::CoreConfig;
use crate::core::errors::{SimError, SimResult};
use crate::core::tps_fsm::{ModeProfile, TpsMode};
use crate::core::types::{
    Candle, ClosedPosition, MarketConditions, OrderBook, SimulationId, SizeClass, Trade,
    TraderId, TraderIdentity, TraderPosition, TraderProfile, TraderStats,
};
use crate::engine::{DecisionInput, PositionView};
use crate::market::{
    ActiveScenario, CandleSeries, ExternalMarketMetrics, ExternalOrderGenerator, TpsModeController,
};
use crate::perf::pools::{ObjectPool, PoolLimits, PoolObject, PoolStats, PoolTagSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub const TRADE_POOL: &str = "trades";
pub const POSITION_POOL: &str = "positions";

const SNAPSHOT_CANDLES: usize = 100;
const SNAPSHOT_TRADES: usize = 50;
const SNAPSHOT_CLOSED: usize = 20;

/// Starting price path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSpec {
    pub initial: f64,
    /// Standard shock per simulated minute, as a fraction
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    /// Drift per simulated minute, as a fraction
    #[serde(default)]
    pub drift: f64,
}

fn default_volatility() -> f64 {
    0.002
}

impl Default for PriceSpec {
    fn default() -> Self {
        Self {
            initial: 100.0,
            volatility: default_volatility(),
            drift: 0.0,
        }
    }
}

/// Caller-supplied shape of one simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub price: PriceSpec,
    /// Simulated epoch ms at creation
    #[serde(default = "default_start_time")]
    pub start_time: u64,
    /// Simulated duration before the run ends on its own
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Overrides `simulation.trader_count`
    #[serde(default)]
    pub trader_count: Option<usize>,
    #[serde(default = "default_candle_interval_ms")]
    pub candle_interval_ms: u64,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_symbol() -> String {
    "SYN/USD".to_string()
}

fn default_start_time() -> u64 {
    1_700_000_000_000
}

fn default_duration_ms() -> u64 {
    24 * 60 * 60 * 1_000
}

fn default_candle_interval_ms() -> u64 {
    60_000
}

fn default_speed() -> f64 {
    1.0
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            price: PriceSpec::default(),
            start_time: default_start_time(),
            duration_ms: default_duration_ms(),
            trader_count: None,
            candle_interval_ms: default_candle_interval_ms(),
            speed: default_speed(),
        }
    }
}

impl SimulationParameters {
    pub fn validate(&self, max_speed: f64) -> SimResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(SimError::validation("symbol must not be empty"));
        }
        if !(self.price.initial.is_finite() && self.price.initial > 0.0) {
            return Err(SimError::validation(format!(
                "initial price must be positive, got {}",
                self.price.initial
            )));
        }
        if !(0.0..=1.0).contains(&self.price.volatility) {
            return Err(SimError::validation("volatility must be in [0, 1] per minute"));
        }
        if !self.price.drift.is_finite() || self.price.drift.abs() >= 1.0 {
            return Err(SimError::validation("drift must be within (-1, 1) per minute"));
        }
        if self.duration_ms == 0 {
            return Err(SimError::validation("duration must be positive"));
        }
        if self.candle_interval_ms == 0 {
            return Err(SimError::validation("candle interval must be positive"));
        }
        if self.trader_count == Some(0) {
            return Err(SimError::validation("trader count must be positive"));
        }
        validate_speed(self.speed, max_speed)
    }
}

pub fn validate_speed(speed: f64, max_speed: f64) -> SimResult<()> {
    if speed.is_finite() && speed > 0.0 && speed <= max_speed {
        Ok(())
    } else {
        Err(SimError::validation(format!(
            "speed must be in (0, {}], got {}",
            max_speed, speed
        )))
    }
}

/// Deterministic trader population for one simulation
pub fn seed_traders<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<TraderProfile> {
    (0..count)
        .map(|i| {
            let id = TraderId(i as u32);
            let size_class = match rng.gen_range(0.0..1.0) {
                x if x < 0.50 => SizeClass::Small,
                x if x < 0.80 => SizeClass::Medium,
                x if x < 0.95 => SizeClass::Large,
                _ => SizeClass::Whale,
            };
            TraderProfile {
                identity: TraderIdentity {
                    id,
                    wallet: format!(
                        "0x{:016x}{:016x}{:08x}",
                        rng.gen::<u64>(),
                        rng.gen::<u64>(),
                        rng.gen::<u32>()
                    ),
                    name: format!("Trader {:03}", i + 1),
                },
                stats: TraderStats::default(),
                entry_threshold: rng.gen_range(0.002..0.02),
                take_profit_pct: rng.gen_range(2.0..10.0),
                stop_loss_pct: rng.gen_range(1.0..6.0),
                size_class,
                trading_frequency: rng.gen_range(0.05..0.4),
                sentiment_sensitivity: rng.gen_range(0.0..1.0),
            }
        })
        .collect()
}

pub struct SimulationState {
    pub id: SimulationId,
    pub params: SimulationParameters,
    pub start_time: u64,
    pub end_time: u64,
    pub current_time: u64,
    pub running: bool,
    pub paused: bool,
    pub speed: f64,
    pub current_price: f64,
    pub conditions: MarketConditions,
    pub candles: CandleSeries,
    pub order_book: OrderBook,
    pub traders: Vec<TraderProfile>,
    pub active_positions: BTreeMap<TraderId, PoolObject<TraderPosition>>,
    pub closed_positions: VecDeque<ClosedPosition>,
    pub recent_trades: VecDeque<PoolObject<Trade>>,
    /// Every executed trade, including those evicted from `recent_trades`
    pub trade_window: TradeWindow,
    pub tps: TpsModeController,
    pub generator: ExternalOrderGenerator,
    pub timeframe: Timeframe,
    pub scenario: Option<ActiveScenario>,
    pub rng: StdRng,
    pub trade_pool: ObjectPool<Trade>,
    pub position_pool: ObjectPool<TraderPosition>,
    pub next_trade_id: u64,
    pub tick_count: u64,
    seed: u64,
    recent_trades_capacity: usize,
    closed_positions_capacity: usize,
    base_trade_pool: usize,
    base_position_pool: usize,
}

impl SimulationState {
    pub fn new(
        id: SimulationId,
        params: SimulationParameters,
        cfg: &CoreConfig,
        table: [ModeProfile; 4],
        tags: &PoolTagSource,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let trader_count = params.trader_count.unwrap_or(cfg.simulation.trader_count);
        let traders = seed_traders(trader_count, &mut rng);
        let limits = PoolLimits {
            max_leak: cfg.pools.max_leak,
            max_cross_pool_attempts: cfg.pools.max_cross_pool_attempts,
        };

        let mut candles = CandleSeries::new(params.candle_interval_ms, cfg.simulation.candle_history);
        candles.update(params.start_time, params.price.initial, 0.0);

        Self {
            id,
            start_time: params.start_time,
            end_time: params.start_time.saturating_add(params.duration_ms),
            current_time: params.start_time,
            running: false,
            paused: false,
            speed: params.speed,
            current_price: params.price.initial,
            conditions: MarketConditions::default(),
            candles,
            order_book: OrderBook::default(),
            traders,
            active_positions: BTreeMap::new(),
            closed_positions: VecDeque::new(),
            recent_trades: VecDeque::new(),
            trade_window: TradeWindow::new(INTENSITY_BUCKET_MS, cfg.analysis.intensity_window_ms),
            tps: TpsModeController::new(table),
            generator: ExternalOrderGenerator::new(cfg.generator.clone()),
            timeframe: cfg.analysis.coarse_timeframe,
            scenario: None,
            rng,
            trade_pool: ObjectPool::new(TRADE_POOL, tags.next_tag(), cfg.pools.trade_pool_size, limits),
            position_pool: ObjectPool::new(
                POSITION_POOL,
                tags.next_tag(),
                cfg.pools.position_pool_size,
                limits,
            ),
            next_trade_id: 1,
            tick_count: 0,
            seed,
            recent_trades_capacity: cfg.simulation.recent_trades_capacity,
            closed_positions_capacity: cfg.simulation.closed_positions_capacity,
            base_trade_pool: cfg.pools.trade_pool_size,
            base_position_pool: cfg.pools.position_pool_size,
            params,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn mode(&self) -> TpsMode {
        self.tps.mode()
    }

    pub fn has_ended(&self) -> bool {
        self.current_time >= self.end_time
    }

    /// Scale pool bounds, 1 restores the configured sizes
    pub fn apply_pool_multiplier(&mut self, multiplier: usize) {
        let m = multiplier.max(1);
        self.trade_pool.set_capacity(self.base_trade_pool * m);
        self.position_pool.set_capacity(self.base_position_pool * m);
    }

    /// Keep a trade in the bounded recent list, releasing the evicted one
    pub fn push_trade(&mut self, trade: PoolObject<Trade>) {
        while self.recent_trades.len() >= self.recent_trades_capacity {
            match self.recent_trades.pop_front() {
                Some(old) => {
                    self.trade_pool.release(old);
                }
                None => break,
            }
        }
        self.trade_window.record(trade.timestamp, 1);
        self.recent_trades.push_back(trade);
    }

    pub fn push_closed(&mut self, closed: ClosedPosition) {
        if self.closed_positions.len() >= self.closed_positions_capacity {
            self.closed_positions.pop_front();
        }
        self.closed_positions.push_back(closed);
    }

    /// Return every pooled object to its pool
    pub fn release_all(&mut self) {
        let positions = std::mem::take(&mut self.active_positions);
        for (_, pos) in positions {
            self.position_pool.release(pos);
        }
        while let Some(trade) = self.recent_trades.pop_front() {
            self.trade_pool.release(trade);
        }
        self.trade_window.clear();
    }

    /// Value-only copies of every trader, safe to hand to workers
    pub fn decision_inputs(&self) -> Vec<DecisionInput> {
        self.traders
            .iter()
            .map(|profile| DecisionInput {
                profile: profile.clone(),
                position: self.active_positions.get(&profile.id()).map(|p| PositionView {
                    entry_price: p.entry_price,
                    entry_time: p.entry_time,
                    quantity: p.quantity,
                }),
            })
            .collect()
    }

    /// USD notional of open long positions at the current price
    pub fn long_exposure(&self) -> f64 {
        self.active_positions
            .values()
            .filter(|p| p.is_long())
            .map(|p| p.notional(self.current_price))
            .sum()
    }

    /// Trades executed within `window_ms` of the current simulated time
    pub fn trades_within(&self, window_ms: u64) -> usize {
        self.trade_window.count_within(self.current_time, window_ms) as usize
    }

    pub fn external_metrics(&self) -> &ExternalMarketMetrics {
        self.generator.metrics()
    }

    pub fn pool_health(&self) -> PoolHealth {
        PoolHealth {
            trades: self.trade_pool.stats(),
            positions: self.position_pool.stats(),
        }
    }

    pub fn status(&self) -> &'static str {
        if self.has_ended() && !self.running {
            "ended"
        } else if self.running && self.paused {
            "paused"
        } else if self.running {
            "running"
        } else {
            "stopped"
        }
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        let skip_trades = self.recent_trades.len().saturating_sub(SNAPSHOT_TRADES);
        let skip_closed = self.closed_positions.len().saturating_sub(SNAPSHOT_CLOSED);
        SimulationSnapshot {
            id: self.id.clone(),
            symbol: self.params.symbol.clone(),
            status: self.status(),
            start_time: self.start_time,
            end_time: self.end_time,
            current_time: self.current_time,
            is_running: self.running,
            is_paused: self.paused,
            speed: self.speed,
            current_price: self.current_price,
            market_conditions: self.conditions,
            candles: self.candles.recent(SNAPSHOT_CANDLES),
            order_book: self.order_book.clone(),
            trader_count: self.traders.len(),
            active_positions: self.active_positions.values().map(|p| p.get().clone()).collect(),
            closed_position_count: self.closed_positions.len(),
            recent_closed_positions: self.closed_positions.iter().skip(skip_closed).cloned().collect(),
            recent_trades: self.recent_trades.iter().skip(skip_trades).map(|t| t.get().clone()).collect(),
            tps_mode: self.mode(),
            external_metrics: self.generator.metrics().clone(),
            timeframe: self.timeframe,
            scenario: self.scenario.clone(),
            tick_count: self.tick_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolHealth {
    pub trades: PoolStats,
    pub positions: PoolStats,
}

impl PoolHealth {
    pub fn healthy(&self) -> bool {
        self.trades.healthy && self.positions.healthy
    }
}

/// Serializable view of one simulation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSnapshot {
    pub id: SimulationId,
    pub symbol: String,
    pub status: &'static str,
    pub start_time: u64,
    pub end_time: u64,
    pub current_time: u64,
    pub is_running: bool,
    pub is_paused: bool,
    pub speed: f64,
    pub current_price: f64,
    pub market_conditions: MarketConditions,
    pub candles: Vec<Candle>,
    pub order_book: OrderBook,
    pub trader_count: usize,
    pub active_positions: Vec<TraderPosition>,
    pub closed_position_count: usize,
    pub recent_closed_positions: Vec<ClosedPosition>,
    pub recent_trades: Vec<Trade>,
    pub tps_mode: TpsMode,
    pub external_metrics: ExternalMarketMetrics,
    pub timeframe: Timeframe,
    pub scenario: Option<ActiveScenario>,
    pub tick_count: u64,
}
