//! Price path, candle aggregation and synthetic depth
//!
//! The walk is a bounded symmetric shock scaled by √(elapsed minutes), plus
//! a drift term from trend and any active scenario. Candles bucket prices by
//! a fixed interval; the series drops its oldest candle when full.

use crate::core::types::{BookLevel, Candle, MarketConditions, OrderBook, Trade, TradeAction, Trend};
use rand::Rng;
use std::collections::VecDeque;

/// Fractional drift per minute contributed by a bullish or bearish trend
const TREND_DRIFT_PER_MIN: f64 = 0.0002;

/// Trend needs at least this fractional move across the lookback
const TREND_THRESHOLD: f64 = 0.005;

const TREND_LOOKBACK: usize = 10;

/// Price floor; the walk never reaches zero
pub const MIN_PRICE: f64 = 1e-9;

/// Inputs to one random-walk step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkParams {
    /// Standard shock per minute, as a fraction
    pub volatility: f64,
    /// Base drift per minute, as a fraction
    pub drift: f64,
    pub trend: Trend,
    /// Scenario scaling of the shock, 1.0 when none
    pub volatility_multiplier: f64,
    /// Scenario drift per minute added on top, 0.0 when none
    pub scenario_drift: f64,
}

/// Advance a price by `elapsed_ms` of simulated time
pub fn step_price<R: Rng + ?Sized>(price: f64, params: &WalkParams, elapsed_ms: u64, rng: &mut R) -> f64 {
    let minutes = elapsed_ms as f64 / 60_000.0;
    if minutes <= 0.0 {
        return price;
    }
    let trend_drift = match params.trend {
        Trend::Bullish => TREND_DRIFT_PER_MIN,
        Trend::Bearish => -TREND_DRIFT_PER_MIN,
        Trend::Sideways => 0.0,
    };
    let drift = (params.drift + trend_drift + params.scenario_drift) * minutes;
    // uniform on [-√3, √3] has unit variance
    let shock = rng.gen_range(-1.0..=1.0) * 3f64.sqrt();
    let sigma = params.volatility * params.volatility_multiplier * minutes.sqrt();
    (price * (1.0 + drift + sigma * shock)).max(MIN_PRICE)
}

/// Fixed-interval OHLCV series
#[derive(Debug, Clone)]
pub struct CandleSeries {
    interval_ms: u64,
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleSeries {
    pub fn new(interval_ms: u64, capacity: usize) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            capacity: capacity.max(1),
            candles: VecDeque::with_capacity(capacity.min(4_096)),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Fold a price observation into the bucket containing `timestamp`
    pub fn update(&mut self, timestamp: u64, price: f64, volume: f64) {
        let bucket = timestamp - timestamp % self.interval_ms;
        match self.candles.back_mut() {
            Some(c) if c.timestamp == bucket => c.apply(price, volume),
            Some(c) if c.timestamp > bucket => {
                // late observation: fold into the newest candle
                c.apply(price, volume)
            }
            _ => {
                let open = self.candles.back().map(|c| c.close).unwrap_or(price);
                let mut candle = Candle::open_at(bucket, open);
                candle.apply(price, volume);
                if self.candles.len() >= self.capacity {
                    self.candles.pop_front();
                }
                self.candles.push_back(candle);
            }
        }
    }

    /// Up to `n` most recent candles, oldest first
    pub fn recent(&self, n: usize) -> Vec<Candle> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).copied().collect()
    }

    /// Up to `n` most recent closes, oldest first
    pub fn closes(&self, n: usize) -> Vec<f64> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).map(|c| c.close).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}

/// Derive the coarse regime from candles and recent trades
pub fn derive_conditions<'a>(
    candles: &CandleSeries,
    recent_trades: impl Iterator<Item = &'a Trade>,
) -> MarketConditions {
    let closes = candles.closes(TREND_LOOKBACK + 1);
    let trend = match (closes.first(), closes.last()) {
        (Some(&first), Some(&last)) if first > 0.0 => {
            let change = (last - first) / first;
            if change > TREND_THRESHOLD {
                Trend::Bullish
            } else if change < -TREND_THRESHOLD {
                Trend::Bearish
            } else {
                Trend::Sideways
            }
        }
        _ => Trend::Sideways,
    };

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let volatility = if returns.len() < 2 {
        0.0
    } else {
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
        var.sqrt()
    };

    let (mut buys, mut sells) = (0.0, 0.0);
    for t in recent_trades {
        match t.action {
            TradeAction::Buy => buys += t.value,
            TradeAction::Sell => sells += t.value,
        }
    }
    let momentum = if buys + sells > 0.0 {
        (buys - sells) / (buys + sells)
    } else {
        0.0
    };

    MarketConditions {
        trend,
        volatility,
        momentum,
        volume: candles.iter().map(|c| c.volume).sum(),
    }
}

/// Regenerate synthetic depth around `price`
///
/// Spread widens with volatility; level sizes decay away from the touch.
pub fn build_order_book<R: Rng + ?Sized>(
    price: f64,
    depth: usize,
    volatility: f64,
    timestamp: u64,
    rng: &mut R,
) -> OrderBook {
    let half_spread = price * (0.0005 + volatility * 0.1).min(0.02) / 2.0;
    let step = (half_spread * 2.0).max(price * 0.0001);
    let base_qty = 10_000.0 / price.max(MIN_PRICE);

    let level = |i: usize, rng: &mut R| -> f64 {
        base_qty * rng.gen_range(0.5..=1.5) * (1.0 + i as f64 * 0.3)
    };

    let mut bids = Vec::with_capacity(depth);
    let mut asks = Vec::with_capacity(depth);
    for i in 0..depth {
        let offset = half_spread + step * i as f64;
        bids.push(BookLevel {
            price: (price - offset).max(MIN_PRICE),
            quantity: level(i, rng),
        });
        asks.push(BookLevel {
            price: price + offset,
            quantity: level(i, rng),
        });
    }

    OrderBook {
        bids,
        asks,
        last_update: timestamp,
    }
}
