//! Trader decision function
//!
//! `decide` is pure apart from the random source it is handed: the same
//! profile, snapshot and seed always give the same answer. Inputs are plain
//! values cloned out of the simulation state so a batch can run on any
//! thread; pooled records never appear here.
//!
//! ```text
//!   activated? ──no──► Hold
//!       │
//!      yes
//!       ├── flat ──► |Δ%| > biased threshold ? Enter(long|short) : Hold
//!       └── open ──► P&L% ≥ TP | ≤ −SL | force-close roll ? Exit : Hold
//! ```

use crate::config::DecisionConfig;
use crate::core::types::{signed_pnl_pct, ExitReason, TraderId, TraderProfile, Trend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Market state shared by every decision in one tick
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    /// Recent closes, oldest first
    pub price_history: Vec<f64>,
    pub current_price: f64,
    pub trend: Trend,
    pub timestamp: u64,
}

/// Copy of an open position, safe to send to a worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionView {
    pub entry_price: f64,
    pub entry_time: u64,
    pub quantity: f64,
}

#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub profile: TraderProfile,
    pub position: Option<PositionView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraderDecision {
    Enter {
        trader_id: TraderId,
        /// Signed: positive long, negative short
        quantity: f64,
        price: f64,
    },
    Exit {
        trader_id: TraderId,
        reason: ExitReason,
        price: f64,
        pnl_pct: f64,
    },
    Hold {
        trader_id: TraderId,
    },
}

impl TraderDecision {
    pub fn trader_id(&self) -> TraderId {
        match *self {
            TraderDecision::Enter { trader_id, .. }
            | TraderDecision::Exit { trader_id, .. }
            | TraderDecision::Hold { trader_id } => trader_id,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, TraderDecision::Hold { .. })
    }
}

/// Fractional move from `lookback` closes ago to the current price
pub fn recent_change(snapshot: &MarketSnapshot, lookback: usize) -> Option<f64> {
    let history = &snapshot.price_history;
    if history.is_empty() || snapshot.current_price <= 0.0 {
        return None;
    }
    let start_idx = history.len().saturating_sub(lookback.max(1));
    let start = history[start_idx];
    if start <= 0.0 {
        return None;
    }
    Some((snapshot.current_price - start) / start)
}

/// Entry thresholds (long, short) after biasing by trend sentiment
pub fn biased_thresholds(profile: &TraderProfile, trend: Trend, cfg: &DecisionConfig) -> (f64, f64) {
    let base = profile.entry_threshold;
    let bias = (profile.sentiment_sensitivity * cfg.trend_bias_factor).clamp(0.0, cfg.max_trend_bias);
    match trend {
        Trend::Bullish => (base * (1.0 - bias), base * (1.0 + bias)),
        Trend::Bearish => (base * (1.0 + bias), base * (1.0 - bias)),
        Trend::Sideways => (base, base),
    }
}

/// Decide what one trader does this tick
pub fn decide<R: Rng + ?Sized>(
    input: &DecisionInput,
    snapshot: &MarketSnapshot,
    cfg: &DecisionConfig,
    rng: &mut R,
) -> TraderDecision {
    let profile = &input.profile;
    let trader_id = profile.id();
    let hold = TraderDecision::Hold { trader_id };

    let activation = (profile.trading_frequency * cfg.activation_scale).clamp(0.0, 1.0);
    if rng.gen::<f64>() >= activation {
        return hold;
    }

    let price = snapshot.current_price;
    match input.position {
        None => {
            let Some(change) = recent_change(snapshot, cfg.lookback_candles) else {
                return hold;
            };
            let (long_threshold, short_threshold) = biased_thresholds(profile, snapshot.trend, cfg);
            let direction = if change > long_threshold {
                1.0
            } else if change < -short_threshold {
                -1.0
            } else {
                return hold;
            };
            let notional = cfg.size_notional.for_class(profile.size_class);
            let quantity = (notional / price).max(cfg.min_quantity);
            TraderDecision::Enter {
                trader_id,
                quantity: quantity * direction,
                price,
            }
        }
        Some(position) => {
            let pnl_pct = signed_pnl_pct(position.entry_price, price, position.quantity);
            let reason = if pnl_pct >= profile.take_profit_pct {
                ExitReason::TakeProfit
            } else if pnl_pct <= -profile.stop_loss_pct {
                ExitReason::StopLoss
            } else if rng.gen::<f64>() < cfg.force_close_probability {
                ExitReason::ForceClose
            } else {
                return hold;
            };
            TraderDecision::Exit {
                trader_id,
                reason,
                price,
                pnl_pct,
            }
        }
    }
}

/// Decide a whole batch with its own seeded random source
///
/// Only actionable decisions are returned.
pub fn decide_batch(
    inputs: &[DecisionInput],
    snapshot: &MarketSnapshot,
    cfg: &DecisionConfig,
    seed: u64,
) -> Vec<TraderDecision> {
    let mut rng = StdRng::seed_from_u64(seed);
    inputs
        .iter()
        .map(|input| decide(input, snapshot, cfg, &mut rng))
        .filter(TraderDecision::is_actionable)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SizeClass, TraderIdentity, TraderStats};
    use proptest::prelude::*;

    fn profile(id: u32, threshold: f64, frequency: f64) -> TraderProfile {
        TraderProfile {
            identity: TraderIdentity {
                id: TraderId(id),
                wallet: format!("0x{:040x}", id),
                name: format!("t{}", id),
            },
            stats: TraderStats::default(),
            entry_threshold: threshold,
            take_profit_pct: 5.0,
            stop_loss_pct: 3.0,
            size_class: SizeClass::Medium,
            trading_frequency: frequency,
            sentiment_sensitivity: 0.5,
        }
    }

    fn snapshot(history: Vec<f64>, current: f64, trend: Trend) -> MarketSnapshot {
        MarketSnapshot {
            price_history: history,
            current_price: current,
            trend,
            timestamp: 0,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn test_bullish_move_enters_long() {
        let input = DecisionInput {
            profile: profile(1, 0.01, 1.0),
            position: None,
        };
        let snap = snapshot(vec![100.0, 101.0, 102.0, 103.0, 104.0], 105.0, Trend::Bullish);
        let decision = decide(&input, &snap, &DecisionConfig::default(), &mut rng());
        match decision {
            TraderDecision::Enter { quantity, price, .. } => {
                assert!(quantity > 0.0);
                assert_eq!(price, 105.0);
                // medium notional 2,500 USD at 105
                assert!((quantity - 2_500.0 / 105.0).abs() < 1e-9);
            }
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_bearish_move_enters_short() {
        let input = DecisionInput {
            profile: profile(2, 0.01, 1.0),
            position: None,
        };
        let snap = snapshot(vec![100.0, 99.0, 98.0, 97.0, 96.0], 95.0, Trend::Bearish);
        let decision = decide(&input, &snap, &DecisionConfig::default(), &mut rng());
        assert!(matches!(decision, TraderDecision::Enter { quantity, .. } if quantity < 0.0));
    }

    #[test]
    fn test_small_move_holds() {
        let input = DecisionInput {
            profile: profile(3, 0.05, 1.0),
            position: None,
        };
        let snap = snapshot(vec![100.0; 5], 101.0, Trend::Sideways);
        let decision = decide(&input, &snap, &DecisionConfig::default(), &mut rng());
        assert_eq!(decision, TraderDecision::Hold { trader_id: TraderId(3) });
    }

    #[test]
    fn test_zero_frequency_never_activates() {
        let input = DecisionInput {
            profile: profile(4, 0.0001, 0.0),
            position: None,
        };
        let snap = snapshot(vec![100.0; 5], 150.0, Trend::Bullish);
        let mut r = rng();
        for _ in 0..100 {
            let d = decide(&input, &snap, &DecisionConfig::default(), &mut r);
            assert!(!d.is_actionable());
        }
    }

    #[test]
    fn test_min_quantity_floor() {
        let input = DecisionInput {
            profile: profile(5, 0.01, 1.0),
            position: None,
        };
        let snap = snapshot(vec![1_000_000.0; 5], 1_100_000.0, Trend::Bullish);
        let cfg = DecisionConfig::default();
        match decide(&input, &snap, &cfg, &mut rng()) {
            TraderDecision::Enter { quantity, .. } => assert_eq!(quantity, cfg.min_quantity),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_trend_bias_lowers_with_trend_threshold() {
        let p = profile(6, 0.02, 1.0);
        let cfg = DecisionConfig::default();
        let (long, short) = biased_thresholds(&p, Trend::Bullish, &cfg);
        assert!(long < 0.02);
        assert!(short > 0.02);
        let (long, short) = biased_thresholds(&p, Trend::Bearish, &cfg);
        assert!(long > 0.02);
        assert!(short < 0.02);
    }

    #[test]
    fn test_take_profit_exit() {
        let input = DecisionInput {
            profile: profile(7, 0.01, 1.0),
            position: Some(PositionView {
                entry_price: 100.0,
                entry_time: 0,
                quantity: 1.0,
            }),
        };
        let snap = snapshot(vec![100.0; 5], 106.0, Trend::Sideways);
        let decision = decide(&input, &snap, &DecisionConfig::default(), &mut rng());
        assert!(matches!(
            decision,
            TraderDecision::Exit {
                reason: ExitReason::TakeProfit,
                ..
            }
        ));
    }

    #[test]
    fn test_short_stop_loss_exit() {
        let input = DecisionInput {
            profile: profile(8, 0.01, 1.0),
            position: Some(PositionView {
                entry_price: 100.0,
                entry_time: 0,
                quantity: -1.0,
            }),
        };
        // price up 4% hurts a short
        let snap = snapshot(vec![100.0; 5], 104.0, Trend::Sideways);
        let decision = decide(&input, &snap, &DecisionConfig::default(), &mut rng());
        assert!(matches!(
            decision,
            TraderDecision::Exit {
                reason: ExitReason::StopLoss,
                ..
            }
        ));
    }

    #[test]
    fn test_force_close_probability_one() {
        let input = DecisionInput {
            profile: profile(9, 0.01, 1.0),
            position: Some(PositionView {
                entry_price: 100.0,
                entry_time: 0,
                quantity: 1.0,
            }),
        };
        let cfg = DecisionConfig {
            force_close_probability: 1.0,
            ..Default::default()
        };
        let snap = snapshot(vec![100.0; 5], 100.5, Trend::Sideways);
        assert!(matches!(
            decide(&input, &snap, &cfg, &mut rng()),
            TraderDecision::Exit {
                reason: ExitReason::ForceClose,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_history_holds() {
        let input = DecisionInput {
            profile: profile(10, 0.0, 1.0),
            position: None,
        };
        let snap = snapshot(vec![], 100.0, Trend::Bullish);
        assert!(!decide(&input, &snap, &DecisionConfig::default(), &mut rng()).is_actionable());
    }

    #[test]
    fn test_batch_is_reproducible() {
        let inputs: Vec<_> = (0..30)
            .map(|i| DecisionInput {
                profile: profile(i, 0.005, 0.5),
                position: None,
            })
            .collect();
        let snap = snapshot(vec![100.0, 100.5, 101.0, 101.5, 102.0], 103.0, Trend::Bullish);
        let cfg = DecisionConfig::default();
        let a = decide_batch(&inputs, &snap, &cfg, 99);
        let b = decide_batch(&inputs, &snap, &cfg, 99);
        assert_eq!(a, b);
        assert!(a.len() <= inputs.len());
        assert!(a.iter().all(TraderDecision::is_actionable));
    }

    proptest! {
        #[test]
        fn prop_entry_direction_matches_move(
            start in 10.0f64..1_000.0,
            change in -0.5f64..0.5,
            seed in any::<u64>(),
        ) {
            let input = DecisionInput { profile: profile(1, 0.01, 1.0), position: None };
            let snap = snapshot(vec![start; 5], start * (1.0 + change), Trend::Sideways);
            let mut r = StdRng::seed_from_u64(seed);
            if let TraderDecision::Enter { quantity, .. } =
                decide(&input, &snap, &DecisionConfig::default(), &mut r)
            {
                prop_assert_eq!(quantity > 0.0, change > 0.0);
            }
        }
    }
}
