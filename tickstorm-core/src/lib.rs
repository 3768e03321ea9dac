//! Tickstorm Core - synthetic market stream generator
//!
//! Generates a continuous synthetic market (prices, order book, trades,
//! trader positions) for demos and load testing, and fans it out to live
//! subscribers.
//!
//! ## Architecture
//! - **Per-simulation locks**: one `Mutex<SimulationState>` per id, no cross-id locking
//! - **TPS modes**: NORMAL → BURST → STRESS → HFT scale external order volume
//! - **Worker pool**: trader decisions fan out above a speed threshold, joined with a deadline
//! - **Object pools**: owner-tagged free lists bound trade/position churn
//! - **Throttled broadcast**: immediate trades and prices, last-value-wins for the rest
//!
//! ## Core Modules
//! - `core`: records, error taxonomy, TPS mode state machine
//! - `engine`: trader decision function
//! - `perf`: pools, worker pool, performance optimizer
//! - `market`: external order generator, price walk, candles, scenarios
//! - `analysis`: market regime analysis and display timeframe
//! - `broadcast`: event fan-out and throttling
//! - `simulation`: state, tick and the registry control surface
//! - `monitoring`: Prometheus metrics and exporter

pub mod analysis;
pub mod broadcast;
pub mod config;
pub mod core;
pub mod engine;
pub mod market;
pub mod monitoring;
pub mod perf;
pub mod simulation;
pub mod utils;

pub use crate::core::{SimError, SimResult, TpsMode};
pub use broadcast::{EventKind, StreamEvent};
pub use config::CoreConfig;
pub use simulation::{SimulationParameters, SimulationRegistry};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::broadcast::{Endpoint, EndpointId, EventFrame, EventKind, StreamEvent};
    pub use crate::config::{ConfigProfile, CoreConfig};
    pub use crate::core::{SimError, SimResult, SimulationId, TpsMode};
    pub use crate::market::ScenarioSpec;
    pub use crate::monitoring::StreamMetrics;
    pub use crate::simulation::{SimulationParameters, SimulationRegistry, TickReport};
}
