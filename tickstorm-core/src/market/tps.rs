//! Per-simulation TPS mode controller

use crate::core::tps_fsm::{ModeProfile, ModeTransition, TpsMode};
use crate::perf::optimizer::PerformanceOptimizer;
use tracing::info;

/// Holds the active `ModeProfile` and the table it is drawn from
#[derive(Debug, Clone)]
pub struct TpsModeController {
    table: [ModeProfile; 4],
    active: ModeProfile,
}

fn slot(mode: TpsMode) -> usize {
    match mode {
        TpsMode::Normal => 0,
        TpsMode::Burst => 1,
        TpsMode::Stress => 2,
        TpsMode::Hft => 3,
    }
}

impl TpsModeController {
    /// Start in NORMAL; `table` is indexed like `TpsMode::ALL`
    pub fn new(table: [ModeProfile; 4]) -> Self {
        let active = table[slot(TpsMode::Normal)].clone();
        Self { table, active }
    }

    pub fn mode(&self) -> TpsMode {
        self.active.mode()
    }

    pub fn profile(&self) -> &ModeProfile {
        &self.active
    }

    pub fn target_tps(&self) -> u32 {
        self.active.target_tps()
    }

    /// Switch mode; a no-op returning `previous == new` when already active
    ///
    /// Crossing the HFT boundary notifies the optimizer.
    pub fn set_mode(&mut self, mode: TpsMode, optimizer: &PerformanceOptimizer) -> ModeTransition {
        let previous = self.mode();
        if previous == mode {
            return ModeTransition {
                previous_mode: previous,
                new_mode: mode,
                target_tps: self.target_tps(),
            };
        }

        self.active = self.table[slot(mode)].clone();
        let transition = ModeTransition {
            previous_mode: previous,
            new_mode: mode,
            target_tps: self.active.target_tps(),
        };

        if transition.entered_high_frequency() {
            optimizer.enable_high_frequency();
        } else if transition.left_high_frequency() {
            optimizer.disable_high_frequency();
        }
        info!(from = %previous, to = %mode, target_tps = transition.target_tps, "TPS mode changed");
        transition
    }
}
