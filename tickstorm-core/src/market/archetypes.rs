//! Behaviour of each external order archetype
//!
//! Priorities decide queue order (higher first). Value ranges are USD
//! notionals drawn uniformly. `trend_follow` shifts the buy probability with
//! the prevailing trend.

pub use crate::config::constants::default_archetype_weights;
pub use crate::core::types::Archetype;
use crate::core::types::{TradeAction, Trend};
use rand::Rng;

/// Priority given to liquidation cascade orders
pub const CASCADE_PRIORITY: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchetypeTraits {
    pub priority: u8,
    pub min_value_usd: f64,
    pub max_value_usd: f64,
    /// Probability of a buy in a sideways market
    pub buy_bias: f64,
    /// Shift of buy probability in a trending market
    pub trend_follow: f64,
    /// Limit price distance from mid, basis points
    pub price_offset_bps: f64,
}

pub fn traits(archetype: Archetype) -> ArchetypeTraits {
    match archetype {
        Archetype::ArbitrageBot => ArchetypeTraits {
            priority: 7,
            min_value_usd: 5_000.0,
            max_value_usd: 50_000.0,
            buy_bias: 0.5,
            trend_follow: 0.0,
            price_offset_bps: 1.0,
        },
        Archetype::RetailTrader => ArchetypeTraits {
            priority: 3,
            min_value_usd: 50.0,
            max_value_usd: 2_000.0,
            buy_bias: 0.5,
            trend_follow: 0.15,
            price_offset_bps: 10.0,
        },
        Archetype::MarketMaker => ArchetypeTraits {
            priority: 5,
            min_value_usd: 1_000.0,
            max_value_usd: 20_000.0,
            buy_bias: 0.5,
            trend_follow: 0.0,
            price_offset_bps: 2.0,
        },
        Archetype::MevBot => ArchetypeTraits {
            priority: 8,
            min_value_usd: 2_000.0,
            max_value_usd: 30_000.0,
            buy_bias: 0.5,
            trend_follow: 0.05,
            price_offset_bps: 0.5,
        },
        Archetype::Whale => ArchetypeTraits {
            priority: 6,
            min_value_usd: 50_000.0,
            max_value_usd: 500_000.0,
            buy_bias: 0.5,
            trend_follow: 0.1,
            price_offset_bps: 5.0,
        },
        Archetype::PanicSeller => ArchetypeTraits {
            priority: 9,
            min_value_usd: 500.0,
            max_value_usd: 20_000.0,
            buy_bias: 0.1,
            trend_follow: 0.05,
            price_offset_bps: 25.0,
        },
    }
}

impl ArchetypeTraits {
    pub fn buy_probability(&self, trend: Trend) -> f64 {
        let shift = match trend {
            Trend::Bullish => self.trend_follow,
            Trend::Bearish => -self.trend_follow,
            Trend::Sideways => 0.0,
        };
        (self.buy_bias + shift).clamp(0.0, 1.0)
    }

    pub fn sample_action<R: Rng + ?Sized>(&self, trend: Trend, rng: &mut R) -> TradeAction {
        if rng.gen::<f64>() < self.buy_probability(trend) {
            TradeAction::Buy
        } else {
            TradeAction::Sell
        }
    }

    pub fn sample_value<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.gen_range(self.min_value_usd..=self.max_value_usd)
    }

    /// Limit price: buys above mid, sells below
    pub fn limit_price(&self, mid: f64, action: TradeAction) -> f64 {
        mid * (1.0 + action.sign() * self.price_offset_bps / 10_000.0)
    }
}
