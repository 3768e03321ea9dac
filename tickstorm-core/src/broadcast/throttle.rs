//! Per-type throttle of one simulation channel
//!
//! At most one delivery per kind per interval. An event arriving inside the
//! interval takes the pending slot, replacing (and counting) any event
//! already waiting there. `take_due` hands back pending events whose
//! interval has elapsed; `drain` hands back all of them at teardown.

use super::event::{EventKind, StreamEvent};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Slot {
    last_sent: Option<Instant>,
    pending: Option<StreamEvent>,
}

/// Outcome of offering one event
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleDecision {
    /// Deliver this event now
    Send(StreamEvent),
    /// Held in the pending slot; `superseded` if it replaced another
    Deferred { superseded: bool },
}

#[derive(Debug)]
pub struct EventThrottle {
    interval: Duration,
    slots: HashMap<EventKind, Slot>,
}

impl EventThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: HashMap::new(),
        }
    }

    pub fn offer(&mut self, event: StreamEvent, now: Instant) -> ThrottleDecision {
        let slot = self.slots.entry(event.kind).or_default();
        let open = slot
            .last_sent
            .map_or(true, |t| now.saturating_duration_since(t) >= self.interval);

        if open && slot.pending.is_none() {
            slot.last_sent = Some(now);
            return ThrottleDecision::Send(event);
        }
        if open {
            // a due pending event is older; the newer value wins
            slot.pending = None;
            slot.last_sent = Some(now);
            return ThrottleDecision::Send(event);
        }
        let superseded = slot.pending.replace(event).is_some();
        ThrottleDecision::Deferred { superseded }
    }

    /// Pending events whose interval has elapsed, marked as sent
    pub fn take_due(&mut self, now: Instant) -> Vec<StreamEvent> {
        let mut due = Vec::new();
        for slot in self.slots.values_mut() {
            let open = slot
                .last_sent
                .map_or(true, |t| now.saturating_duration_since(t) >= self.interval);
            if open {
                if let Some(event) = slot.pending.take() {
                    slot.last_sent = Some(now);
                    due.push(event);
                }
            }
        }
        due.sort_by_key(|e| e.timestamp);
        due
    }

    /// Every pending event regardless of interval, oldest first
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut pending: Vec<StreamEvent> = self.slots.values_mut().filter_map(|s| s.pending.take()).collect();
        pending.sort_by_key(|e| e.timestamp);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|s| s.pending.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind, n: u64) -> StreamEvent {
        StreamEvent::new(kind, n, json!({ "n": n }))
    }

    #[test]
    fn test_first_sends_rest_defer() {
        let mut t = EventThrottle::new(Duration::from_millis(100));
        let now = Instant::now();
        assert!(matches!(t.offer(event(EventKind::SimulationState, 0), now), ThrottleDecision::Send(_)));
        assert_eq!(
            t.offer(event(EventKind::SimulationState, 1), now),
            ThrottleDecision::Deferred { superseded: false }
        );
        assert_eq!(
            t.offer(event(EventKind::SimulationState, 2), now),
            ThrottleDecision::Deferred { superseded: true }
        );
        assert_eq!(t.pending_count(), 1);
    }

    #[test]
    fn test_last_value_wins_on_flush() {
        let mut t = EventThrottle::new(Duration::from_millis(100));
        let now = Instant::now();
        for n in 0..10 {
            t.offer(event(EventKind::ExternalMarketMetrics, n), now);
        }
        assert!(t.take_due(now + Duration::from_millis(50)).is_empty());
        let due = t.take_due(now + Duration::from_millis(100));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].data["n"], 9);
        assert_eq!(t.pending_count(), 0);
    }

    #[test]
    fn test_drain_ignores_interval() {
        let mut t = EventThrottle::new(Duration::from_millis(100));
        let now = Instant::now();
        t.offer(event(EventKind::SimulationStatus, 1), now);
        t.offer(event(EventKind::SimulationStatus, 3), now);
        t.offer(event(EventKind::ExternalMarketMetrics, 0), now);
        t.offer(event(EventKind::ExternalMarketMetrics, 2), now);

        let drained: Vec<u64> = t.drain().iter().map(|e| e.timestamp).collect();
        assert_eq!(drained, vec![2, 3]);
        assert_eq!(t.pending_count(), 0);
        assert!(t.drain().is_empty());
    }

    #[test]
    fn test_kinds_throttle_independently() {
        let mut t = EventThrottle::new(Duration::from_millis(100));
        let now = Instant::now();
        assert!(matches!(t.offer(event(EventKind::SimulationState, 0), now), ThrottleDecision::Send(_)));
        assert!(matches!(t.offer(event(EventKind::TimeframeChange, 0), now), ThrottleDecision::Send(_)));
    }

    #[test]
    fn test_open_window_replaces_stale_pending() {
        let mut t = EventThrottle::new(Duration::from_millis(100));
        let now = Instant::now();
        t.offer(event(EventKind::SimulationState, 0), now);
        t.offer(event(EventKind::SimulationState, 1), now);
        let later = now + Duration::from_millis(150);
        match t.offer(event(EventKind::SimulationState, 2), later) {
            ThrottleDecision::Send(e) => assert_eq!(e.data["n"], 2),
            other => panic!("expected send, got {:?}", other),
        }
        assert_eq!(t.pending_count(), 0);
    }
}
