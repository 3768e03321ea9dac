//! Numeric defaults for the stream core
//!
//! Grouped by subsystem. Everything here can be overridden through
//! `CoreConfig`; these values only seed the `Default` impls.

use crate::core::types::Archetype;
use crate::core::tps_fsm::TpsMode;

// ===== TICK / FRAME =====

/// 60 Hz frame budget the adaptive batch sizer aims under
pub const FRAME_BUDGET_MS: f64 = 1000.0 / 60.0;

/// Wall-clock interval between ticks driven by the external scheduler
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

// ===== SIMULATION SHAPE =====

pub const DEFAULT_TRADER_COUNT: usize = 118;
pub const DEFAULT_CANDLE_HISTORY: usize = 2_000;
pub const DEFAULT_RECENT_TRADES_CAPACITY: usize = 1_000;
pub const DEFAULT_CLOSED_POSITIONS_CAPACITY: usize = 1_000;
pub const DEFAULT_ORDER_BOOK_DEPTH: usize = 10;

// ===== POOLS =====

pub const DEFAULT_TRADE_POOL_SIZE: usize = 2_000;
pub const DEFAULT_POSITION_POOL_SIZE: usize = 256;

// ===== WORKERS / BATCHING =====

pub const DEFAULT_MAX_WORKERS: usize = 8;
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_MIN_BATCH_SIZE: usize = 8;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;
pub const DEFAULT_INITIAL_BATCH_SIZE: usize = 32;

// ===== ANALYSIS =====

pub const ANALYSIS_CACHE_TTL_MS: u64 = 5_000;
pub const ANALYSIS_CANDLE_WINDOW: usize = 20;
pub const INTENSITY_WINDOW_MS: u64 = 5 * 60 * 1_000;
/// Width of one trade-count bucket in simulated time
pub const INTENSITY_BUCKET_MS: u64 = 1_000;

// Executed trades per minute; NORMAL executes about 1,500
pub const INTENSITY_NORMAL: f64 = 600.0;
pub const INTENSITY_VOLATILE: f64 = 6_000.0;
pub const INTENSITY_EXTREME: f64 = 60_000.0;
pub const INTENSITY_FINE_TIMEFRAME: f64 = 30_000.0;

// ===== BROADCAST =====

pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 100;
pub const DEFAULT_HIGH_TPS_THRESHOLD: f64 = 1_000.0;

// ===== ARCHETYPE MIX PER MODE =====

/// Default weighted archetype table for a mode
pub fn default_archetype_weights(mode: TpsMode) -> Vec<(Archetype, f64)> {
    use Archetype::*;
    match mode {
        TpsMode::Normal => vec![
            (RetailTrader, 0.50),
            (MarketMaker, 0.25),
            (ArbitrageBot, 0.15),
            (Whale, 0.05),
            (MevBot, 0.03),
            (PanicSeller, 0.02),
        ],
        TpsMode::Burst => vec![
            (RetailTrader, 0.40),
            (MarketMaker, 0.20),
            (ArbitrageBot, 0.20),
            (Whale, 0.08),
            (MevBot, 0.07),
            (PanicSeller, 0.05),
        ],
        TpsMode::Stress => vec![
            (RetailTrader, 0.25),
            (MarketMaker, 0.10),
            (ArbitrageBot, 0.15),
            (Whale, 0.10),
            (MevBot, 0.10),
            (PanicSeller, 0.30),
        ],
        TpsMode::Hft => vec![
            (RetailTrader, 0.10),
            (MarketMaker, 0.30),
            (ArbitrageBot, 0.30),
            (Whale, 0.05),
            (MevBot, 0.20),
            (PanicSeller, 0.05),
        ],
    }
}
