//! Market regime analysis and display granularity
//!
//! ```text
//!   volatility = avg-change score (0..50) + max-change score (0..50)
//!   intensity  = trades executed in the intensity window ÷ window minutes
//!
//!   extreme  : vol ≥ 70 or int ≥ intensity.extreme   (60,000/min)
//!   volatile : vol ≥ 40 or int ≥ intensity.volatile  (6,000/min)
//!   normal   : vol ≥ 15 or int ≥ intensity.normal    (600/min)
//!   calm     : otherwise
//!
//!   fine timeframe ⇐ scenario ∨ extreme ∨ vol > 70 ∨ int > intensity.fine_timeframe
//! ```
//!
//! Intensity counts every executed trade, trader and external alike; the
//! defaults put NORMAL order flow (about 1,500 trades per simulated minute)
//! between the normal and volatile cut-offs.
//!
//! Results are cached per simulation for `cache_ttl_ms` of wall time; a
//! lookup inside the window returns the cached value unchanged.

use crate::config::{AnalysisConfig, IntensityThresholds};
use crate::core::types::{Candle, SimulationId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Timeframe {
    pub fn duration_ms(self) -> u64 {
        match self {
            Timeframe::OneMinute => 60_000,
            Timeframe::FiveMinutes => 5 * 60_000,
            Timeframe::FifteenMinutes => 15 * 60_000,
            Timeframe::OneHour => 60 * 60_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCondition {
    Calm,
    Normal,
    Volatile,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceLevel {
    Micro,
    Low,
    Mid,
    High,
    Ultra,
}

impl PriceLevel {
    pub fn of(price: f64) -> Self {
        if price < 0.01 {
            PriceLevel::Micro
        } else if price < 1.0 {
            PriceLevel::Low
        } else if price < 100.0 {
            PriceLevel::Mid
        } else if price < 10_000.0 {
            PriceLevel::High
        } else {
            PriceLevel::Ultra
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub volatility_score: f64,
    pub trading_intensity: f64,
    pub price_level: PriceLevel,
    pub condition: MarketCondition,
    pub recommended_timeframe: Timeframe,
    pub rationale: String,
    pub should_adapt: bool,
    /// Simulated time of the computation
    pub computed_at: u64,
}

/// What the analyzer reads from a simulation
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    /// Most recent candles, oldest first
    pub candles: Vec<Candle>,
    /// Trades with timestamps inside the intensity window
    pub trades_in_window: usize,
    pub current_price: f64,
    pub sim_time: u64,
    pub scenario_active: bool,
    pub current_timeframe: Timeframe,
}

fn avg_change_score(avg: f64) -> f64 {
    if avg >= 2.0 {
        50.0
    } else if avg >= 1.0 {
        35.0
    } else if avg >= 0.5 {
        20.0
    } else if avg >= 0.2 {
        10.0
    } else {
        0.0
    }
}

fn max_change_score(max: f64) -> f64 {
    if max >= 5.0 {
        50.0
    } else if max >= 3.0 {
        35.0
    } else if max >= 1.5 {
        20.0
    } else if max >= 0.5 {
        10.0
    } else {
        0.0
    }
}

/// Volatility score 0..=100 over the given candles
pub fn volatility_score(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    let changes: Vec<f64> = candles.iter().map(|c| c.change_pct().abs()).collect();
    let avg = changes.iter().sum::<f64>() / changes.len() as f64;
    let max = changes.iter().copied().fold(0.0, f64::max);
    avg_change_score(avg) + max_change_score(max)
}

pub fn classify(volatility: f64, intensity: f64, t: &IntensityThresholds) -> MarketCondition {
    if volatility >= 70.0 || intensity >= t.extreme {
        MarketCondition::Extreme
    } else if volatility >= 40.0 || intensity >= t.volatile {
        MarketCondition::Volatile
    } else if volatility >= 15.0 || intensity >= t.normal {
        MarketCondition::Normal
    } else {
        MarketCondition::Calm
    }
}

struct CachedAnalysis {
    analysis: MarketAnalysis,
    at: Instant,
}

/// Per-simulation analysis cache
pub struct MarketAnalyzer {
    cfg: AnalysisConfig,
    cache: DashMap<SimulationId, CachedAnalysis>,
}

impl MarketAnalyzer {
    pub fn new(cfg: AnalysisConfig) -> Self {
        Self {
            cfg,
            cache: DashMap::new(),
        }
    }

    pub fn candle_window(&self) -> usize {
        self.cfg.candle_window
    }

    pub fn intensity_window_ms(&self) -> u64 {
        self.cfg.intensity_window_ms
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.cfg.cache_ttl_ms)
    }

    /// Analyze now
    pub fn analyze(&self, id: &SimulationId, input: &AnalysisInput) -> MarketAnalysis {
        self.analyze_at(id, input, Instant::now())
    }

    /// Analyze as of `now`, serving the cached value while it is fresh
    pub fn analyze_at(&self, id: &SimulationId, input: &AnalysisInput, now: Instant) -> MarketAnalysis {
        if let Some(hit) = self.cache.get(id) {
            if now.saturating_duration_since(hit.at) < self.ttl() {
                return hit.analysis.clone();
            }
        }

        let analysis = self.compute(input);
        debug!(
            simulation = %id,
            volatility = analysis.volatility_score,
            intensity = analysis.trading_intensity,
            condition = ?analysis.condition,
            timeframe = %analysis.recommended_timeframe,
            "market analysis refreshed"
        );
        self.cache.insert(
            id.clone(),
            CachedAnalysis {
                analysis: analysis.clone(),
                at: now,
            },
        );
        analysis
    }

    /// Last cached analysis, fresh or not
    pub fn cached(&self, id: &SimulationId) -> Option<MarketAnalysis> {
        self.cache.get(id).map(|c| c.analysis.clone())
    }

    /// Drop the cache entry of a deleted or reset simulation
    pub fn forget(&self, id: &SimulationId) {
        self.cache.remove(id);
    }

    pub fn compute(&self, input: &AnalysisInput) -> MarketAnalysis {
        let skip = input.candles.len().saturating_sub(self.cfg.candle_window);
        let volatility = volatility_score(&input.candles[skip..]);
        let window_minutes = (self.cfg.intensity_window_ms as f64 / 60_000.0).max(f64::EPSILON);
        let intensity = input.trades_in_window as f64 / window_minutes;
        let condition = classify(volatility, intensity, &self.cfg.intensity);

        let mut reasons = Vec::new();
        if input.scenario_active {
            reasons.push("scenario active".to_string());
        }
        if condition == MarketCondition::Extreme {
            reasons.push("extreme conditions".to_string());
        }
        if volatility > 70.0 {
            reasons.push(format!("volatility {:.0}", volatility));
        }
        if intensity > self.cfg.intensity.fine_timeframe {
            reasons.push(format!("intensity {:.1} trades/min", intensity));
        }

        let (recommended, rationale) = if reasons.is_empty() {
            (
                self.cfg.coarse_timeframe,
                format!("{:?} market, coarse granularity is enough", condition).to_lowercase(),
            )
        } else {
            (self.cfg.fine_timeframe, reasons.join(", "))
        };

        MarketAnalysis {
            volatility_score: volatility,
            trading_intensity: intensity,
            price_level: PriceLevel::of(input.current_price),
            condition,
            recommended_timeframe: recommended,
            rationale,
            should_adapt: recommended != input.current_timeframe,
            computed_at: input.sim_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn candles(change_pct: f64, n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let mut c = Candle::open_at(i as u64 * 60_000, 100.0);
                c.apply(100.0 * (1.0 + change_pct / 100.0), 1.0);
                c
            })
            .collect()
    }

    fn input(candles: Vec<Candle>, trades: usize) -> AnalysisInput {
        AnalysisInput {
            candles,
            trades_in_window: trades,
            current_price: 100.0,
            sim_time: 1_000,
            scenario_active: false,
            current_timeframe: Timeframe::FifteenMinutes,
        }
    }

    fn analyzer() -> MarketAnalyzer {
        MarketAnalyzer::new(AnalysisConfig::default())
    }

    #[test]
    fn test_volatility_thresholds() {
        assert_eq!(volatility_score(&candles(0.1, 20)), 0.0);
        assert_eq!(volatility_score(&candles(0.6, 20)), 30.0);
        assert_eq!(volatility_score(&candles(2.5, 20)), 70.0);
        assert_eq!(volatility_score(&candles(6.0, 20)), 100.0);
    }

    #[test]
    fn test_classify_ordered_checks() {
        let t = IntensityThresholds::default();
        assert_eq!(classify(75.0, 0.0, &t), MarketCondition::Extreme);
        assert_eq!(classify(0.0, 60_000.0, &t), MarketCondition::Extreme);
        assert_eq!(classify(40.0, 0.0, &t), MarketCondition::Volatile);
        assert_eq!(classify(0.0, 6_000.0, &t), MarketCondition::Volatile);
        assert_eq!(classify(0.0, 600.0, &t), MarketCondition::Normal);
        assert_eq!(classify(10.0, 599.0, &t), MarketCondition::Calm);
    }

    #[test]
    fn test_price_levels() {
        assert_eq!(PriceLevel::of(0.001), PriceLevel::Micro);
        assert_eq!(PriceLevel::of(0.01), PriceLevel::Low);
        assert_eq!(PriceLevel::of(1.0), PriceLevel::Mid);
        assert_eq!(PriceLevel::of(100.0), PriceLevel::High);
        assert_eq!(PriceLevel::of(10_000.0), PriceLevel::Ultra);
    }

    #[test]
    fn test_calm_market_recommends_coarse() {
        let a = analyzer().compute(&input(candles(0.05, 20), 1_000));
        assert_eq!(a.condition, MarketCondition::Calm);
        assert_eq!(a.recommended_timeframe, Timeframe::FifteenMinutes);
        assert!(!a.should_adapt);
        assert_relative_eq!(a.trading_intensity, 200.0);
    }

    #[test]
    fn test_scenario_forces_fine() {
        let mut i = input(candles(0.05, 20), 0);
        i.scenario_active = true;
        let a = analyzer().compute(&i);
        assert_eq!(a.recommended_timeframe, Timeframe::OneMinute);
        assert!(a.should_adapt);
        assert!(a.rationale.contains("scenario"));
    }

    #[test]
    fn test_high_intensity_forces_fine() {
        // 160,000 trades over 5 minutes = 32,000 per minute
        let a = analyzer().compute(&input(candles(0.05, 20), 160_000));
        assert_eq!(a.condition, MarketCondition::Volatile);
        assert_eq!(a.recommended_timeframe, Timeframe::OneMinute);
    }

    #[test]
    fn test_only_last_window_candles_count() {
        let mut series = candles(8.0, 30);
        series.extend(candles(0.0, 20));
        let a = analyzer().compute(&input(series, 0));
        assert_eq!(a.volatility_score, 0.0);
    }

    #[test]
    fn test_cache_within_and_after_ttl() {
        let analyzer = analyzer();
        let id = SimulationId::new("sim");
        let t0 = Instant::now();
        let calm = analyzer.analyze_at(&id, &input(candles(0.05, 20), 0), t0);

        let wild = input(candles(6.0, 20), 500_000);
        let within = analyzer.analyze_at(&id, &wild, t0 + Duration::from_millis(4_999));
        assert_eq!(within, calm);

        let after = analyzer.analyze_at(&id, &wild, t0 + Duration::from_millis(5_000));
        assert_eq!(after.condition, MarketCondition::Extreme);
        assert_ne!(after, calm);
    }

    #[test]
    fn test_intensity_separates_order_flow_levels() {
        let analyzer = analyzer();
        // NORMAL flow, about 1,500 trades a minute
        let normal = analyzer.compute(&input(candles(0.05, 20), 7_500));
        assert_eq!(normal.condition, MarketCondition::Normal);
        assert_eq!(normal.recommended_timeframe, Timeframe::FifteenMinutes);

        // HFT flow, capped at 10,000 trades a second
        let hft = analyzer.compute(&input(candles(0.05, 20), 3_000_000));
        assert_eq!(hft.condition, MarketCondition::Extreme);
        assert_eq!(hft.recommended_timeframe, Timeframe::OneMinute);
        assert!(hft.trading_intensity > normal.trading_intensity);
    }

    #[test]
    fn test_custom_intensity_thresholds() {
        let cfg = AnalysisConfig {
            intensity: IntensityThresholds {
                normal: 1.0,
                volatile: 2.0,
                extreme: 3.0,
                fine_timeframe: 2.5,
            },
            ..AnalysisConfig::default()
        };
        let a = MarketAnalyzer::new(cfg).compute(&input(candles(0.05, 20), 12));
        assert_relative_eq!(a.trading_intensity, 2.4);
        assert_eq!(a.condition, MarketCondition::Volatile);
        assert_eq!(a.recommended_timeframe, Timeframe::FifteenMinutes);
    }

    #[test]
    fn test_forget_drops_cache() {
        let analyzer = analyzer();
        let id = SimulationId::new("gone");
        analyzer.analyze_at(&id, &input(candles(0.05, 20), 0), Instant::now());
        assert!(analyzer.cached(&id).is_some());
        analyzer.forget(&id);
        assert!(analyzer.cached(&id).is_none());
    }

    #[test]
    fn test_timeframe_serde() {
        assert_eq!(serde_json::to_string(&Timeframe::FifteenMinutes).unwrap(), "\"15m\"");
        let t: Timeframe = serde_json::from_str("\"1m\"").unwrap();
        assert_eq!(t, Timeframe::OneMinute);
    }
}
