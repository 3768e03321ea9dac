pub mod constants;
pub mod profiles;
pub mod types;

pub use profiles::{ConfigProfile, ProfileName};
pub use types::*;

use crate::core::errors::{SimError, SimResult};
use crate::core::tps_fsm::{ModeProfile, TpsMode};
use anyhow::{Context, Result};
use std::path::Path;

impl CoreConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = Self::from_json_str(&raw)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        Ok(cfg)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: CoreConfig =
            serde_json::from_str(raw).context("Failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> SimResult<()> {
        let sim = &self.simulation;
        if sim.tick_interval_ms == 0 {
            return Err(SimError::validation("simulation.tick_interval_ms must be positive"));
        }
        if sim.trader_count == 0 {
            return Err(SimError::validation("simulation.trader_count must be positive"));
        }
        if sim.candle_history < self.analysis.candle_window {
            return Err(SimError::validation(format!(
                "simulation.candle_history ({}) must cover analysis.candle_window ({})",
                sim.candle_history, self.analysis.candle_window
            )));
        }
        if sim.recent_trades_capacity == 0 {
            return Err(SimError::validation(
                "simulation.recent_trades_capacity must be positive",
            ));
        }
        if !(sim.max_speed >= 1.0) {
            return Err(SimError::validation("simulation.max_speed must be at least 1"));
        }

        if self.workers.max_workers == 0 {
            return Err(SimError::validation("workers.max_workers must be positive"));
        }
        if self.workers.batch_timeout_ms == 0 {
            return Err(SimError::validation("workers.batch_timeout_ms must be positive"));
        }

        if self.pools.trade_pool_size == 0 || self.pools.position_pool_size == 0 {
            return Err(SimError::validation("pool sizes must be positive"));
        }

        let b = &self.batching;
        if b.min_batch_size == 0 || b.min_batch_size > b.max_batch_size {
            return Err(SimError::validation(format!(
                "batching bounds invalid: min {} max {}",
                b.min_batch_size, b.max_batch_size
            )));
        }
        if b.initial_batch_size < b.min_batch_size || b.initial_batch_size > b.max_batch_size {
            return Err(SimError::validation(format!(
                "batching.initial_batch_size {} outside [{}, {}]",
                b.initial_batch_size, b.min_batch_size, b.max_batch_size
            )));
        }
        if !(b.headroom_ratio > 0.0 && b.headroom_ratio < 1.0) {
            return Err(SimError::validation("batching.headroom_ratio must be in (0, 1)"));
        }

        let g = &self.generator;
        if g.backpressure_threshold == 0 || g.backpressure_threshold > g.max_queue_depth {
            return Err(SimError::validation(
                "generator.backpressure_threshold must be in 1..=max_queue_depth",
            ));
        }
        check_unit("generator.min_admission_factor", g.min_admission_factor)?;
        check_unit("generator.count_jitter", g.count_jitter)?;
        check_unit("generator.front_run_probability", g.front_run_probability)?;
        check_unit("generator.cascade_exposure_fraction", g.cascade_exposure_fraction)?;
        if g.cascade_min_orders == 0 || g.cascade_min_orders > g.cascade_max_orders {
            return Err(SimError::validation("generator cascade order bounds invalid"));
        }
        if !(g.market_depth_usd > 0.0) || !(g.cascade_unit_usd > 0.0) {
            return Err(SimError::validation(
                "generator.market_depth_usd and cascade_unit_usd must be positive",
            ));
        }

        let d = &self.decisions;
        check_unit("decisions.force_close_probability", d.force_close_probability)?;
        check_unit("decisions.max_trend_bias", d.max_trend_bias)?;
        if d.activation_scale < 0.0 {
            return Err(SimError::validation("decisions.activation_scale must be non-negative"));
        }
        if d.lookback_candles == 0 {
            return Err(SimError::validation("decisions.lookback_candles must be positive"));
        }
        if !(d.min_quantity > 0.0) {
            return Err(SimError::validation("decisions.min_quantity must be positive"));
        }

        if self.analysis.fine_timeframe.duration_ms() >= self.analysis.coarse_timeframe.duration_ms()
        {
            return Err(SimError::validation(
                "analysis.fine_timeframe must be finer than analysis.coarse_timeframe",
            ));
        }
        let i = &self.analysis.intensity;
        if !(i.normal > 0.0 && i.normal < i.volatile && i.volatile < i.extreme) {
            return Err(SimError::validation(format!(
                "analysis.intensity thresholds must increase: normal {} volatile {} extreme {}",
                i.normal, i.volatile, i.extreme
            )));
        }
        if !(i.fine_timeframe > 0.0) {
            return Err(SimError::validation("analysis.intensity.fine_timeframe must be positive"));
        }
        if self.broadcast.throttle_interval_ms == 0 {
            return Err(SimError::validation("broadcast.throttle_interval_ms must be positive"));
        }

        self.mode_profiles().map(|_| ())
    }

    /// Build one `ModeProfile` per TPS mode, indexed like `TpsMode::ALL`
    pub fn mode_profiles(&self) -> SimResult<[ModeProfile; 4]> {
        let build = |mode: TpsMode| -> SimResult<ModeProfile> {
            let entry = self
                .tps
                .modes
                .iter()
                .find(|e| e.mode == mode)
                .ok_or_else(|| SimError::validation(format!("tps table has no entry for {}", mode)))?;
            let weights = entry
                .weights
                .iter()
                .map(|w| (w.archetype, w.weight))
                .collect();
            ModeProfile::new(mode, entry.target_tps, weights)
        };
        Ok([
            build(TpsMode::Normal)?,
            build(TpsMode::Burst)?,
            build(TpsMode::Stress)?,
            build(TpsMode::Hft)?,
        ])
    }
}

fn check_unit(name: &str, value: f64) -> SimResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::validation(format!("{} must be in [0, 1], got {}", name, value)))
    }
}
