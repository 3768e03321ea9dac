//! Active scenario record
//!
//! A scenario is a timed overlay of generic multipliers on the price walk
//! and order flow. It moves through three phases by elapsed fraction of its
//! duration and ends on its own once the duration has passed.

use crate::core::errors::{SimError, SimResult};
use crate::core::tps_fsm::TpsMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPhase {
    Onset,
    Peak,
    Recovery,
}

impl ScenarioPhase {
    /// Phase at a fraction of the scenario's duration
    pub fn at(fraction: f64) -> Self {
        if fraction < 0.25 {
            ScenarioPhase::Onset
        } else if fraction < 0.75 {
            ScenarioPhase::Peak
        } else {
            ScenarioPhase::Recovery
        }
    }

    /// Share of the scenario's multipliers applied in this phase
    pub fn intensity(self) -> f64 {
        match self {
            ScenarioPhase::Onset => 0.5,
            ScenarioPhase::Peak => 1.0,
            ScenarioPhase::Recovery => 0.3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioPhase::Onset => "onset",
            ScenarioPhase::Peak => "peak",
            ScenarioPhase::Recovery => "recovery",
        }
    }
}

/// What a caller asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    pub name: String,
    /// Simulated duration
    pub duration_ms: u64,
    /// Peak scaling of price volatility
    #[serde(default = "default_volatility_multiplier")]
    pub volatility_multiplier: f64,
    /// Peak drift per simulated minute, as a fraction
    #[serde(default)]
    pub drift_per_minute: f64,
    /// Mode switched to while the scenario runs
    #[serde(default)]
    pub tps_mode: Option<TpsMode>,
}

fn default_volatility_multiplier() -> f64 {
    1.0
}

impl ScenarioSpec {
    pub fn validate(&self) -> SimResult<()> {
        if self.name.trim().is_empty() {
            return Err(SimError::validation("scenario name must not be empty"));
        }
        if self.duration_ms == 0 {
            return Err(SimError::validation("scenario duration must be positive"));
        }
        if !(self.volatility_multiplier.is_finite() && self.volatility_multiplier > 0.0) {
            return Err(SimError::validation("scenario volatility multiplier must be positive"));
        }
        if !self.drift_per_minute.is_finite() || self.drift_per_minute.abs() >= 1.0 {
            return Err(SimError::validation("scenario drift must be within (-1, 1) per minute"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveScenario {
    pub spec: ScenarioSpec,
    pub started_at: u64,
    pub phase: ScenarioPhase,
    /// Mode active before the scenario switched it
    pub previous_mode: Option<TpsMode>,
}

/// Phase change observed by `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: ScenarioPhase,
    pub to: ScenarioPhase,
}

impl ActiveScenario {
    pub fn start(spec: ScenarioSpec, now_ms: u64, previous_mode: Option<TpsMode>) -> Self {
        Self {
            spec,
            started_at: now_ms,
            phase: ScenarioPhase::Onset,
            previous_mode,
        }
    }

    pub fn elapsed_fraction(&self, now_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.started_at) as f64;
        (elapsed / self.spec.duration_ms as f64).min(1.0)
    }

    pub fn is_finished(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.started_at) >= self.spec.duration_ms
    }

    /// Move to the phase for `now_ms`, reporting a change
    pub fn advance(&mut self, now_ms: u64) -> Option<PhaseChange> {
        let next = ScenarioPhase::at(self.elapsed_fraction(now_ms));
        if next == self.phase {
            return None;
        }
        let change = PhaseChange {
            from: self.phase,
            to: next,
        };
        self.phase = next;
        Some(change)
    }

    /// Volatility scaling for the current phase
    pub fn volatility_multiplier(&self) -> f64 {
        1.0 + (self.spec.volatility_multiplier - 1.0) * self.phase.intensity()
    }

    pub fn drift_per_minute(&self) -> f64 {
        self.spec.drift_per_minute * self.phase.intensity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ScenarioSpec {
        ScenarioSpec {
            name: "flash-crash".to_string(),
            duration_ms: 1_000,
            volatility_multiplier: 5.0,
            drift_per_minute: -0.01,
            tps_mode: Some(TpsMode::Stress),
        }
    }

    #[test]
    fn test_phases_by_fraction() {
        let mut s = ActiveScenario::start(spec(), 10_000, None);
        assert_eq!(s.phase, ScenarioPhase::Onset);
        assert_eq!(s.advance(10_100), None);
        assert_eq!(
            s.advance(10_300),
            Some(PhaseChange {
                from: ScenarioPhase::Onset,
                to: ScenarioPhase::Peak
            })
        );
        assert_eq!(s.advance(10_800).map(|c| c.to), Some(ScenarioPhase::Recovery));
        assert!(!s.is_finished(10_999));
        assert!(s.is_finished(11_000));
    }

    #[test]
    fn test_multipliers_follow_phase() {
        let mut s = ActiveScenario::start(spec(), 0, None);
        assert!((s.volatility_multiplier() - 3.0).abs() < 1e-9);
        s.advance(500);
        assert!((s.volatility_multiplier() - 5.0).abs() < 1e-9);
        assert!((s.drift_per_minute() + 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_validation() {
        assert!(spec().validate().is_ok());
        let mut bad = spec();
        bad.duration_ms = 0;
        assert!(matches!(bad.validate(), Err(SimError::Validation(_))));
        let mut bad = spec();
        bad.volatility_multiplier = f64::NAN;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let s: ScenarioSpec = serde_json::from_str(r#"{"name":"calm","durationMs":5000}"#).unwrap();
        assert_eq!(s.volatility_multiplier, 1.0);
        assert_eq!(s.tps_mode, None);
    }
}
