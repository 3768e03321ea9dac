//! Simulation orchestration
//!
//! - `state`: per-simulation state, parameters and snapshot view
//! - `tick`: one-tick advancement
//! - `registry`: the control surface owning every simulation

pub mod registry;
pub mod state;
pub mod tick;

pub use registry::{CascadeReport, SimulationRegistry, TickReport};
pub use state::{
    seed_traders, PoolHealth, PriceSpec, SimulationParameters, SimulationSnapshot, SimulationState,
};
pub use tick::{TickContext, TickOutcome};
