use super::constants::*;
use crate::analysis::timeframe::Timeframe;
use crate::core::tps_fsm::TpsMode;
use crate::core::types::{Archetype, SizeClass};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub simulation: SimulationDefaults,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub pools: PoolConfig,
    #[serde(default)]
    pub batching: BatchConfig,
    #[serde(default)]
    pub tps: TpsTableConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub decisions: DecisionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Seed for every random source; `None` seeds from entropy
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

/// Shape of every simulation created by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationDefaults {
    /// Wall-clock duration of one tick
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_trader_count")]
    pub trader_count: usize,

    /// Candles retained per simulation, oldest dropped first
    #[serde(default = "default_candle_history")]
    pub candle_history: usize,

    #[serde(default = "default_recent_trades_capacity")]
    pub recent_trades_capacity: usize,

    #[serde(default = "default_closed_positions_capacity")]
    pub closed_positions_capacity: usize,

    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: usize,

    /// Upper bound accepted by `set_speed`
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

/// Decision worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Cap on workers regardless of core count
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Fixed worker count; `None` sizes from available cores
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Deadline for the fan-in barrier of one tick
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Simulation speed at or above which decisions go to the pool
    #[serde(default = "default_parallel_speed_threshold")]
    pub parallel_speed_threshold: f64,

    /// Fewer traders than this always run inline
    #[serde(default = "default_min_parallel_batch")]
    pub min_parallel_batch: usize,
}

/// Object pool sizes and health limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_trade_pool_size")]
    pub trade_pool_size: usize,

    #[serde(default = "default_position_pool_size")]
    pub position_pool_size: usize,

    #[serde(default = "default_max_leak")]
    pub max_leak: u64,

    #[serde(default = "default_max_cross_pool_attempts")]
    pub max_cross_pool_attempts: u64,
}

/// Adaptive batch sizing bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_initial_batch_size")]
    pub initial_batch_size: usize,

    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_batch_growth_step")]
    pub growth_step: usize,

    /// Grow while average tick time is below this share of the frame budget
    #[serde(default = "default_headroom_ratio")]
    pub headroom_ratio: f64,

    /// Number of recent ticks averaged
    #[serde(default = "default_tick_window")]
    pub tick_window: usize,
}

/// One row of the TPS mode table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTableEntry {
    pub mode: TpsMode,
    pub target_tps: u32,
    pub weights: Vec<ArchetypeWeight>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArchetypeWeight {
    pub archetype: Archetype,
    pub weight: f64,
}

/// TPS mode table (target throughput + archetype weights per mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpsTableConfig {
    #[serde(default = "default_mode_table")]
    pub modes: Vec<ModeTableEntry>,
}

/// External order flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Queue depth above which admission is reduced
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,

    /// Hard bound; orders beyond it are rejected
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Floor of the admission factor under backpressure
    #[serde(default = "default_min_admission_factor")]
    pub min_admission_factor: f64,

    /// Relative spread of per-tick order counts
    #[serde(default = "default_count_jitter")]
    pub count_jitter: f64,

    /// Processing capacity as a multiple of the target rate
    #[serde(default = "default_processing_headroom")]
    pub processing_headroom: f64,

    /// Absolute cap on orders processed per tick
    #[serde(default = "default_max_processed_per_tick")]
    pub max_processed_per_tick: usize,

    /// Order value at which MEV bots consider front-running
    #[serde(default = "default_front_run_min_value")]
    pub front_run_min_value: f64,

    #[serde(default = "default_front_run_probability")]
    pub front_run_probability: f64,

    /// Notional that moves price by 1% when executed
    #[serde(default = "default_market_depth_usd")]
    pub market_depth_usd: f64,

    #[serde(default = "default_cascade_min_orders")]
    pub cascade_min_orders: usize,

    #[serde(default = "default_cascade_max_orders")]
    pub cascade_max_orders: usize,

    /// Long exposure represented by one cascade order
    #[serde(default = "default_cascade_unit_usd")]
    pub cascade_unit_usd: f64,

    /// Share of long exposure dumped by a cascade
    #[serde(default = "default_cascade_exposure_fraction")]
    pub cascade_exposure_fraction: f64,
}

/// USD notional per position size class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeNotional {
    #[serde(default = "default_small_notional")]
    pub small: f64,
    #[serde(default = "default_medium_notional")]
    pub medium: f64,
    #[serde(default = "default_large_notional")]
    pub large: f64,
    #[serde(default = "default_whale_notional")]
    pub whale: f64,
}

impl SizeNotional {
    pub fn for_class(&self, class: SizeClass) -> f64 {
        match class {
            SizeClass::Small => self.small,
            SizeClass::Medium => self.medium,
            SizeClass::Large => self.large,
            SizeClass::Whale => self.whale,
        }
    }
}

/// Trader decision engine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Activation probability = trading_frequency × activation_scale
    #[serde(default = "default_activation_scale")]
    pub activation_scale: f64,

    /// Per-tick chance that an open position is closed regardless of P&L
    #[serde(default = "default_force_close_probability")]
    pub force_close_probability: f64,

    /// Candles looked back when measuring the entry move
    #[serde(default = "default_lookback_candles")]
    pub lookback_candles: usize,

    /// Threshold bias per unit of sentiment sensitivity
    #[serde(default = "default_trend_bias_factor")]
    pub trend_bias_factor: f64,

    #[serde(default = "default_max_trend_bias")]
    pub max_trend_bias: f64,

    #[serde(default = "default_min_quantity")]
    pub min_quantity: f64,

    #[serde(default)]
    pub size_notional: SizeNotional,
}

/// Market analysis and display granularity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    #[serde(default = "default_candle_window")]
    pub candle_window: usize,

    #[serde(default = "default_intensity_window_ms")]
    pub intensity_window_ms: u64,

    #[serde(default = "default_fine_timeframe")]
    pub fine_timeframe: Timeframe,

    #[serde(default = "default_coarse_timeframe")]
    pub coarse_timeframe: Timeframe,

    #[serde(default)]
    pub intensity: IntensityThresholds,
}

/// Trades-per-minute cut-offs of the intensity half of the classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityThresholds {
    #[serde(default = "default_intensity_normal")]
    pub normal: f64,

    #[serde(default = "default_intensity_volatile")]
    pub volatile: f64,

    #[serde(default = "default_intensity_extreme")]
    pub extreme: f64,

    /// Above this the fine timeframe is recommended
    #[serde(default = "default_intensity_fine")]
    pub fine_timeframe: f64,
}

/// Event fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Minimum spacing of throttled events per (simulation, type)
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,

    /// Actual TPS above which trade lists get an archetype summary
    #[serde(default = "default_high_tps_threshold")]
    pub high_tps_threshold: f64,

    /// Period of the background flush of pending throttled events
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Logging and metrics export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,

    /// Prometheus exporter address; `None` disables the exporter
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

// Default value functions
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_trader_count() -> usize {
    DEFAULT_TRADER_COUNT
}

fn default_candle_history() -> usize {
    DEFAULT_CANDLE_HISTORY
}

fn default_recent_trades_capacity() -> usize {
    DEFAULT_RECENT_TRADES_CAPACITY
}

fn default_closed_positions_capacity() -> usize {
    DEFAULT_CLOSED_POSITIONS_CAPACITY
}

fn default_order_book_depth() -> usize {
    DEFAULT_ORDER_BOOK_DEPTH
}

fn default_max_speed() -> f64 {
    100.0
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_batch_timeout_ms() -> u64 {
    DEFAULT_BATCH_TIMEOUT_MS
}

fn default_parallel_speed_threshold() -> f64 {
    2.0
}

fn default_min_parallel_batch() -> usize {
    16
}

fn default_trade_pool_size() -> usize {
    DEFAULT_TRADE_POOL_SIZE
}

fn default_position_pool_size() -> usize {
    DEFAULT_POSITION_POOL_SIZE
}

fn default_max_leak() -> u64 {
    50_000
}

fn default_max_cross_pool_attempts() -> u64 {
    10
}

fn default_initial_batch_size() -> usize {
    DEFAULT_INITIAL_BATCH_SIZE
}

fn default_min_batch_size() -> usize {
    DEFAULT_MIN_BATCH_SIZE
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_batch_growth_step() -> usize {
    8
}

fn default_headroom_ratio() -> f64 {
    0.5
}

fn default_tick_window() -> usize {
    10
}

fn default_mode_table() -> Vec<ModeTableEntry> {
    TpsMode::ALL
        .iter()
        .map(|&mode| ModeTableEntry {
            mode,
            target_tps: mode.default_target_tps(),
            weights: default_archetype_weights(mode)
                .into_iter()
                .map(|(archetype, weight)| ArchetypeWeight { archetype, weight })
                .collect(),
        })
        .collect()
}

fn default_backpressure_threshold() -> usize {
    5_000
}

fn default_max_queue_depth() -> usize {
    50_000
}

fn default_min_admission_factor() -> f64 {
    0.05
}

fn default_count_jitter() -> f64 {
    0.1
}

fn default_processing_headroom() -> f64 {
    1.2
}

fn default_max_processed_per_tick() -> usize {
    1_000
}

fn default_front_run_min_value() -> f64 {
    50_000.0
}

fn default_front_run_probability() -> f64 {
    0.3
}

fn default_market_depth_usd() -> f64 {
    5_000_000.0
}

fn default_cascade_min_orders() -> usize {
    5
}

fn default_cascade_max_orders() -> usize {
    500
}

fn default_cascade_unit_usd() -> f64 {
    10_000.0
}

fn default_cascade_exposure_fraction() -> f64 {
    0.6
}

fn default_small_notional() -> f64 {
    500.0
}

fn default_medium_notional() -> f64 {
    2_500.0
}

fn default_large_notional() -> f64 {
    10_000.0
}

fn default_whale_notional() -> f64 {
    50_000.0
}

fn default_activation_scale() -> f64 {
    1.0
}

fn default_force_close_probability() -> f64 {
    0.01
}

fn default_lookback_candles() -> usize {
    5
}

fn default_trend_bias_factor() -> f64 {
    0.3
}

fn default_max_trend_bias() -> f64 {
    0.9
}

fn default_min_quantity() -> f64 {
    0.01
}

fn default_cache_ttl_ms() -> u64 {
    ANALYSIS_CACHE_TTL_MS
}

fn default_candle_window() -> usize {
    ANALYSIS_CANDLE_WINDOW
}

fn default_intensity_window_ms() -> u64 {
    INTENSITY_WINDOW_MS
}

fn default_fine_timeframe() -> Timeframe {
    Timeframe::OneMinute
}

fn default_coarse_timeframe() -> Timeframe {
    Timeframe::FifteenMinutes
}

fn default_intensity_normal() -> f64 {
    INTENSITY_NORMAL
}

fn default_intensity_volatile() -> f64 {
    INTENSITY_VOLATILE
}

fn default_intensity_extreme() -> f64 {
    INTENSITY_EXTREME
}

fn default_intensity_fine() -> f64 {
    INTENSITY_FINE_TIMEFRAME
}

fn default_throttle_interval_ms() -> u64 {
    DEFAULT_THROTTLE_INTERVAL_MS
}

fn default_high_tps_threshold() -> f64 {
    DEFAULT_HIGH_TPS_THRESHOLD
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationDefaults {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            trader_count: default_trader_count(),
            candle_history: default_candle_history(),
            recent_trades_capacity: default_recent_trades_capacity(),
            closed_positions_capacity: default_closed_positions_capacity(),
            order_book_depth: default_order_book_depth(),
            max_speed: default_max_speed(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            worker_count: None,
            batch_timeout_ms: default_batch_timeout_ms(),
            parallel_speed_threshold: default_parallel_speed_threshold(),
            min_parallel_batch: default_min_parallel_batch(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            trade_pool_size: default_trade_pool_size(),
            position_pool_size: default_position_pool_size(),
            max_leak: default_max_leak(),
            max_cross_pool_attempts: default_max_cross_pool_attempts(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: default_initial_batch_size(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            growth_step: default_batch_growth_step(),
            headroom_ratio: default_headroom_ratio(),
            tick_window: default_tick_window(),
        }
    }
}

impl Default for TpsTableConfig {
    fn default() -> Self {
        Self {
            modes: default_mode_table(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backpressure_threshold: default_backpressure_threshold(),
            max_queue_depth: default_max_queue_depth(),
            min_admission_factor: default_min_admission_factor(),
            count_jitter: default_count_jitter(),
            processing_headroom: default_processing_headroom(),
            max_processed_per_tick: default_max_processed_per_tick(),
            front_run_min_value: default_front_run_min_value(),
            front_run_probability: default_front_run_probability(),
            market_depth_usd: default_market_depth_usd(),
            cascade_min_orders: default_cascade_min_orders(),
            cascade_max_orders: default_cascade_max_orders(),
            cascade_unit_usd: default_cascade_unit_usd(),
            cascade_exposure_fraction: default_cascade_exposure_fraction(),
        }
    }
}

impl Default for SizeNotional {
    fn default() -> Self {
        Self {
            small: default_small_notional(),
            medium: default_medium_notional(),
            large: default_large_notional(),
            whale: default_whale_notional(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            activation_scale: default_activation_scale(),
            force_close_probability: default_force_close_probability(),
            lookback_candles: default_lookback_candles(),
            trend_bias_factor: default_trend_bias_factor(),
            max_trend_bias: default_max_trend_bias(),
            min_quantity: default_min_quantity(),
            size_notional: SizeNotional::default(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            candle_window: default_candle_window(),
            intensity_window_ms: default_intensity_window_ms(),
            fine_timeframe: default_fine_timeframe(),
            coarse_timeframe: default_coarse_timeframe(),
            intensity: IntensityThresholds::default(),
        }
    }
}

impl Default for IntensityThresholds {
    fn default() -> Self {
        Self {
            normal: default_intensity_normal(),
            volatile: default_intensity_volatile(),
            extreme: default_intensity_extreme(),
            fine_timeframe: default_intensity_fine(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: default_throttle_interval_ms(),
            high_tps_threshold: default_high_tps_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}
