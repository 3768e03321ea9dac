//! Archetype aggregation of trade lists
//!
//! Under high throughput a trade list is summarized per source so
//! subscribers can render totals without walking every trade.

use crate::core::types::{Archetype, TradeAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Bucket used for trades made by simulated traders
pub const TRADER_BUCKET: &str = "TRADER";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeRecord {
    #[serde(default)]
    archetype: Option<Archetype>,
    action: TradeAction,
    #[serde(default)]
    value: f64,
    #[serde(default)]
    quantity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeBucket {
    pub count: u64,
    pub volume: f64,
    pub quantity: f64,
    pub buys: u64,
    pub sells: u64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeSummary {
    pub total_trades: u64,
    pub total_volume: f64,
    pub by_archetype: BTreeMap<String, ArchetypeBucket>,
    /// Entries that did not parse as trades
    pub skipped: u64,
}

/// Summarize a JSON trade array; unparseable entries are skipped
pub fn summarize(trades: &[Value]) -> ArchetypeSummary {
    let mut summary = ArchetypeSummary::default();
    for raw in trades {
        let Ok(trade) = TradeRecord::deserialize(raw) else {
            summary.skipped += 1;
            continue;
        };
        let key = trade
            .archetype
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| TRADER_BUCKET.to_string());
        let bucket = summary.by_archetype.entry(key).or_default();
        bucket.count += 1;
        bucket.volume += trade.value;
        bucket.quantity += trade.quantity;
        match trade.action {
            TradeAction::Buy => {
                bucket.buys += 1;
                bucket.buy_volume += trade.value;
            }
            TradeAction::Sell => {
                bucket.sells += 1;
                bucket.sell_volume += trade.value;
            }
        }
        summary.total_trades += 1;
        summary.total_volume += trade.value;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_groups_by_source() {
        let trades = vec![
            json!({"archetype": "WHALE", "action": "buy", "value": 100.0, "quantity": 1.0}),
            json!({"archetype": "WHALE", "action": "sell", "value": 50.0, "quantity": 0.5}),
            json!({"traderId": 4, "action": "buy", "value": 10.0, "quantity": 0.1}),
            json!({"nonsense": true}),
        ];
        let s = summarize(&trades);
        assert_eq!(s.total_trades, 3);
        assert_eq!(s.skipped, 1);
        assert!((s.total_volume - 160.0).abs() < 1e-9);

        let whale = &s.by_archetype["WHALE"];
        assert_eq!((whale.count, whale.buys, whale.sells), (2, 1, 1));
        assert!((whale.sell_volume - 50.0).abs() < 1e-9);
        assert_eq!(s.by_archetype[TRADER_BUCKET].count, 1);
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(summarize(&[]), ArchetypeSummary::default());
    }
}
