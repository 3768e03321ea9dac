//! Trader decision engine
//!
//! Per-profile enter/exit/hold logic. The performance optimizer decides
//! whether a tick's batch runs inline or on the worker pool; this module
//! only knows how to decide.

pub mod decision;

pub use decision::{
    decide, decide_batch, DecisionInput, MarketSnapshot, PositionView, TraderDecision,
};
