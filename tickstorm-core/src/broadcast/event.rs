//! Outbound event envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Trade,
    ProcessedTrade,
    PriceUpdate,
    SimulationState,
    SimulationStatus,
    ExternalMarketMetrics,
    ScenarioApplied,
    ScenarioCleared,
    ScenarioPhaseChanged,
    TimeframeChange,
    BatchUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::Trade,
        EventKind::ProcessedTrade,
        EventKind::PriceUpdate,
        EventKind::SimulationState,
        EventKind::SimulationStatus,
        EventKind::ExternalMarketMetrics,
        EventKind::ScenarioApplied,
        EventKind::ScenarioCleared,
        EventKind::ScenarioPhaseChanged,
        EventKind::TimeframeChange,
        EventKind::BatchUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Trade => "trade",
            EventKind::ProcessedTrade => "processed_trade",
            EventKind::PriceUpdate => "price_update",
            EventKind::SimulationState => "simulation_state",
            EventKind::SimulationStatus => "simulation_status",
            EventKind::ExternalMarketMetrics => "external_market_metrics",
            EventKind::ScenarioApplied => "scenario_applied",
            EventKind::ScenarioCleared => "scenario_cleared",
            EventKind::ScenarioPhaseChanged => "scenario_phase_changed",
            EventKind::TimeframeChange => "timeframe_change",
            EventKind::BatchUpdate => "batch_update",
        }
    }

    /// Delivered on every emission, never throttled
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            EventKind::Trade | EventKind::ProcessedTrade | EventKind::PriceUpdate
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{type, timestamp, data}` as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: u64,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(kind: EventKind, timestamp: u64, data: Value) -> Self {
        Self { kind, timestamp, data }
    }

    /// Build from any serializable payload
    ///
    /// A payload that fails to serialize is logged and sent as `null`.
    pub fn from_payload<T: Serialize + ?Sized>(kind: EventKind, timestamp: u64, payload: &T) -> Self {
        let data = serde_json::to_value(payload).unwrap_or_else(|e| {
            warn!(event = %kind, error = %e, "event payload failed to serialize");
            Value::Null
        });
        Self::new(kind, timestamp, data)
    }

    /// Immediate kinds, plus any batch that carries trades
    pub fn is_immediate(&self) -> bool {
        self.kind.is_immediate() || (self.kind == EventKind::BatchUpdate && self.carries_trades())
    }

    fn carries_trades(&self) -> bool {
        self.data
            .get("trades")
            .and_then(Value::as_array)
            .map_or(false, |trades| !trades.is_empty())
    }
}

/// Serialized event shared by every endpoint of one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub kind: EventKind,
    pub payload: Arc<str>,
}

impl EventFrame {
    pub fn encode(event: &StreamEvent) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(event)?;
        Ok(Self {
            kind: event.kind,
            payload: Arc::from(text),
        })
    }

    pub fn decode(&self) -> Result<StreamEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = StreamEvent::new(EventKind::PriceUpdate, 7, json!({"price": 101.5}));
        let frame = EventFrame::encode(&event).unwrap();
        let v: Value = serde_json::from_str(&frame.payload).unwrap();
        assert_eq!(v["type"], "price_update");
        assert_eq!(v["timestamp"], 7);
        assert_eq!(v["data"]["price"], 101.5);
        assert_eq!(frame.decode().unwrap(), event);
    }

    #[test]
    fn test_immediate_kinds() {
        let immediate: Vec<_> = EventKind::ALL.iter().filter(|k| k.is_immediate()).collect();
        assert_eq!(immediate.len(), 3);
        assert!(!EventKind::ExternalMarketMetrics.is_immediate());
    }

    #[test]
    fn test_batch_with_trades_is_immediate() {
        let batch = StreamEvent::new(EventKind::BatchUpdate, 1, json!({"count": 1, "trades": [{"id": 9}]}));
        assert!(batch.is_immediate());

        let empty = StreamEvent::new(EventKind::BatchUpdate, 1, json!({"count": 0, "trades": []}));
        assert!(!empty.is_immediate());
        let stats = StreamEvent::new(EventKind::BatchUpdate, 1, json!({"queueDepth": 4}));
        assert!(!stats.is_immediate());
    }

    #[test]
    fn test_kind_names_match_serde() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
