//! Core types for the synthetic stream
//!
//! - `types`: market records (trades, positions, profiles, candles)
//! - `errors`: the `SimError` taxonomy
//! - `tps_fsm`: throughput mode state machine

pub mod errors;
pub mod tps_fsm;
pub mod types;

pub use errors::{SimError, SimResult};
pub use tps_fsm::{ModeProfile, ModeTransition, TpsMode};
pub use types::{
    signed_pnl_pct, Archetype, BookLevel, Candle, ClosedPosition, ExitReason, MarketConditions,
    OrderBook, SimulationId, SizeClass, Trade, TradeAction, TraderId, TraderIdentity,
    TraderPosition, TraderProfile, TraderStats, Trend,
};
