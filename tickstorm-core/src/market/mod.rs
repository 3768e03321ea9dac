//! Synthetic market
//!
//! External order flow driven by the TPS mode, the price path, candles and
//! depth, and the optional scenario overlay.

pub mod archetypes;
pub mod generator;
pub mod price;
pub mod scenario;
pub mod tps;

pub use archetypes::{traits, ArchetypeTraits};
pub use generator::{
    CascadeOutcome, ExternalMarketMetrics, ExternalOrder, ExternalOrderGenerator, GenerationReport, Sentiment,
};
pub use price::{build_order_book, derive_conditions, step_price, CandleSeries, WalkParams};
pub use scenario::{ActiveScenario, PhaseChange, ScenarioPhase, ScenarioSpec};
pub use tps::TpsModeController;
