//! Throughput mode state machine
//!
//! ```text
//!   NORMAL ◄──► BURST ◄──► STRESS ◄──► HFT
//!      ▲                                 │
//!      └─────────── any → any ───────────┘
//! ```
//!
//! Every mode is reachable from every other mode. A mode is bound to a
//! `ModeProfile` (target throughput + archetype sampler); a transition swaps
//! the whole profile in one assignment, so a reader never sees the new
//! target paired with the old weights.

use crate::core::errors::{SimError, SimResult};
use crate::core::types::Archetype;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TpsMode {
    #[default]
    Normal,
    Burst,
    Stress,
    Hft,
}

impl TpsMode {
    pub const ALL: [TpsMode; 4] = [TpsMode::Normal, TpsMode::Burst, TpsMode::Stress, TpsMode::Hft];

    pub fn as_str(self) -> &'static str {
        match self {
            TpsMode::Normal => "NORMAL",
            TpsMode::Burst => "BURST",
            TpsMode::Stress => "STRESS",
            TpsMode::Hft => "HFT",
        }
    }

    /// Synthetic orders per second when no table override is configured
    pub fn default_target_tps(self) -> u32 {
        match self {
            TpsMode::Normal => 25,
            TpsMode::Burst => 150,
            TpsMode::Stress => 1_500,
            TpsMode::Hft => 15_000,
        }
    }

    /// Liquidation cascades only make sense under heavy load
    pub fn allows_liquidation_cascade(self) -> bool {
        matches!(self, TpsMode::Stress | TpsMode::Hft)
    }

    pub fn is_high_frequency(self) -> bool {
        self == TpsMode::Hft
    }

    fn valid_set() -> String {
        Self::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TpsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TpsMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(TpsMode::Normal),
            "BURST" => Ok(TpsMode::Burst),
            "STRESS" => Ok(TpsMode::Stress),
            "HFT" => Ok(TpsMode::Hft),
            _ => Err(SimError::validation(format!(
                "unknown TPS mode '{}'; valid modes: {}",
                s,
                TpsMode::valid_set()
            ))),
        }
    }
}

/// Target throughput and archetype mix bound to one mode
#[derive(Debug, Clone)]
pub struct ModeProfile {
    mode: TpsMode,
    target_tps: u32,
    weights: Vec<(Archetype, f64)>,
    sampler: WeightedIndex<f64>,
}

impl ModeProfile {
    pub fn new(mode: TpsMode, target_tps: u32, weights: Vec<(Archetype, f64)>) -> SimResult<Self> {
        if target_tps == 0 {
            return Err(SimError::validation(format!(
                "target throughput for {} must be positive",
                mode
            )));
        }
        let sampler = WeightedIndex::new(weights.iter().map(|(_, w)| *w)).map_err(|e| {
            SimError::validation(format!("archetype weights for {} are invalid: {}", mode, e))
        })?;
        Ok(Self {
            mode,
            target_tps,
            weights,
            sampler,
        })
    }

    pub fn mode(&self) -> TpsMode {
        self.mode
    }

    pub fn target_tps(&self) -> u32 {
        self.target_tps
    }

    pub fn weights(&self) -> &[(Archetype, f64)] {
        &self.weights
    }

    /// Normalized weight of one archetype, 0.0 if absent from the table
    pub fn weight_of(&self, archetype: Archetype) -> f64 {
        let total: f64 = self.weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.weights
            .iter()
            .filter(|(a, _)| *a == archetype)
            .map(|(_, w)| w / total)
            .sum()
    }

    pub fn sample_archetype<R: Rng + ?Sized>(&self, rng: &mut R) -> Archetype {
        self.weights[self.sampler.sample(rng)].0
    }
}

/// Result of a `set_mode` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeTransition {
    pub previous_mode: TpsMode,
    pub new_mode: TpsMode,
    pub target_tps: u32,
}

impl ModeTransition {
    pub fn changed(&self) -> bool {
        self.previous_mode != self.new_mode
    }

    pub fn entered_high_frequency(&self) -> bool {
        self.changed() && self.new_mode.is_high_frequency()
    }

    pub fn left_high_frequency(&self) -> bool {
        self.changed() && self.previous_mode.is_high_frequency()
    }
}
