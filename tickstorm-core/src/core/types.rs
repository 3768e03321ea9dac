//! Plain data types shared by every stage of the stream pipeline
//!
//! Everything here is an explicit struct with defaults resolved at
//! construction. `Trade` and `TraderPosition` are pool-managed and
//! implement `Reusable`; the rest are ordinary owned values.

use crate::perf::pools::Reusable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry key for one simulation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(String);

impl SimulationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimulationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Index of a trader profile inside its simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraderId(pub u32);

impl fmt::Display for TraderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trader-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    #[default]
    Buy,
    Sell,
}

impl TradeAction {
    /// +1 for buys, -1 for sells
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            TradeAction::Buy => 1.0,
            TradeAction::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            TradeAction::Buy => TradeAction::Sell,
            TradeAction::Sell => TradeAction::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Sideways,
}

/// Source category of a synthetic order that does not come from a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Archetype {
    ArbitrageBot,
    RetailTrader,
    MarketMaker,
    MevBot,
    Whale,
    PanicSeller,
}

impl Archetype {
    pub const ALL: [Archetype; 6] = [
        Archetype::ArbitrageBot,
        Archetype::RetailTrader,
        Archetype::MarketMaker,
        Archetype::MevBot,
        Archetype::Whale,
        Archetype::PanicSeller,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Archetype::ArbitrageBot => "ARBITRAGE_BOT",
            Archetype::RetailTrader => "RETAIL_TRADER",
            Archetype::MarketMaker => "MARKET_MAKER",
            Archetype::MevBot => "MEV_BOT",
            Archetype::Whale => "WHALE",
            Archetype::PanicSeller => "PANIC_SELLER",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV aggregate over one candle bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn open_at(timestamp: u64, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    pub fn apply(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    /// Close-to-open change in percent
    pub fn change_pct(&self) -> f64 {
        if self.open <= 0.0 {
            return 0.0;
        }
        (self.close - self.open) / self.open * 100.0
    }
}

/// Executed trade, pool-managed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: u64,
    pub timestamp: u64,
    /// Set for trades made by a trader profile
    pub trader_id: Option<TraderId>,
    /// Set for trades produced by external synthetic order flow
    pub archetype: Option<Archetype>,
    pub action: TradeAction,
    pub price: f64,
    pub quantity: f64,
    pub value: f64,
    pub impact: f64,
}

impl Reusable for Trade {
    fn reset(&mut self) {
        *self = Trade::default();
    }
}

/// Open position held by a trader profile, pool-managed
///
/// `quantity` is signed: positive is long, negative is short.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderPosition {
    pub trader_id: TraderId,
    pub entry_price: f64,
    pub entry_time: u64,
    pub quantity: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
}

impl TraderPosition {
    #[inline]
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn notional(&self, price: f64) -> f64 {
        self.quantity.abs() * price
    }

    /// Recompute unrealized P&L against a mark price
    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = (price - self.entry_price) * self.quantity;
        self.unrealized_pnl_pct = signed_pnl_pct(self.entry_price, price, self.quantity);
    }
}

impl Reusable for TraderPosition {
    fn reset(&mut self) {
        *self = TraderPosition::default();
    }
}

/// P&L percentage of a position, positive when the position gained
pub fn signed_pnl_pct(entry_price: f64, price: f64, quantity: f64) -> f64 {
    if entry_price <= 0.0 || quantity == 0.0 {
        return 0.0;
    }
    (price - entry_price) / entry_price * 100.0 * quantity.signum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    ForceClose,
}

/// Position history record, not pooled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPosition {
    pub trader_id: TraderId,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: u64,
    pub exit_time: u64,
    pub quantity: f64,
    pub realized_pnl: f64,
    pub pnl_pct: f64,
    pub reason: ExitReason,
}

/// Position sizing bucket of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Whale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderIdentity {
    pub id: TraderId,
    pub wallet: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderStats {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub realized_pnl: f64,
    pub volume: f64,
}

impl TraderStats {
    pub fn win_rate(&self) -> f64 {
        let closed = self.wins + self.losses;
        if closed == 0 {
            0.0
        } else {
            self.wins as f64 / closed as f64
        }
    }

    pub fn record_close(&mut self, realized_pnl: f64, volume: f64) {
        self.trades += 1;
        self.volume += volume;
        self.realized_pnl += realized_pnl;
        if realized_pnl >= 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }
}

/// Behavioural parameters of one simulated trader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderProfile {
    pub identity: TraderIdentity,
    pub stats: TraderStats,
    /// Minimum fractional price move that triggers an entry (0.01 = 1%)
    pub entry_threshold: f64,
    /// Exit once P&L% reaches this value
    pub take_profit_pct: f64,
    /// Exit once P&L% falls to minus this value
    pub stop_loss_pct: f64,
    pub size_class: SizeClass,
    /// Activation weight per tick, 0.0..=1.0
    pub trading_frequency: f64,
    /// How strongly the prevailing trend biases entry thresholds, 0.0..=1.0
    pub sentiment_sensitivity: f64,
}

impl TraderProfile {
    pub fn id(&self) -> TraderId {
        self.identity.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Synthetic depth snapshot around the current price
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub last_update: u64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }
}

/// Coarse regime read by the trader engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketConditions {
    pub trend: Trend,
    /// Recent realized volatility as a fraction
    pub volatility: f64,
    /// Net order-flow imbalance, -1.0..=1.0
    pub momentum: f64,
    /// Traded volume over the candle history
    pub volume: f64,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            trend: Trend::Sideways,
            volatility: 0.0,
            momentum: 0.0,
            volume: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_position_sign_encodes_direction() {
        let mut long = TraderPosition {
            trader_id: TraderId(1),
            entry_price: 100.0,
            quantity: 2.0,
            ..Default::default()
        };
        long.mark(110.0);
        assert!(long.is_long());
        assert_relative_eq!(long.unrealized_pnl, 20.0);
        assert_relative_eq!(long.unrealized_pnl_pct, 10.0);

        let mut short = TraderPosition {
            trader_id: TraderId(2),
            entry_price: 100.0,
            quantity: -2.0,
            ..Default::default()
        };
        short.mark(110.0);
        assert!(!short.is_long());
        assert_relative_eq!(short.unrealized_pnl, -20.0);
        assert_relative_eq!(short.unrealized_pnl_pct, -10.0);
    }

    #[test]
    fn test_trade_reset_clears_fields() {
        let mut trade = Trade {
            id: 9,
            price: 1.5,
            archetype: Some(Archetype::Whale),
            ..Default::default()
        };
        trade.reset();
        assert_eq!(trade, Trade::default());
    }

    #[test]
    fn test_candle_apply() {
        let mut c = Candle::open_at(0, 100.0);
        c.apply(105.0, 1.0);
        c.apply(98.0, 2.0);
        assert_relative_eq!(c.high, 105.0);
        assert_relative_eq!(c.low, 98.0);
        assert_relative_eq!(c.close, 98.0);
        assert_relative_eq!(c.volume, 3.0);
        assert_relative_eq!(c.change_pct(), -2.0);
    }

    #[test]
    fn test_stats_win_rate() {
        let mut stats = TraderStats::default();
        stats.record_close(10.0, 100.0);
        stats.record_close(-5.0, 100.0);
        stats.record_close(3.0, 100.0);
        assert_eq!(stats.trades, 3);
        assert_relative_eq!(stats.win_rate(), 2.0 / 3.0);
    }

    #[test]
    fn test_archetype_serializes_screaming() {
        let json = serde_json::to_string(&Archetype::MevBot).unwrap();
        assert_eq!(json, "\"MEV_BOT\"");
    }
}
