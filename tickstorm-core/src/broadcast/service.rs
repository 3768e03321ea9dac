//! Broadcast service
//!
//! One channel per simulation: a subscriber list behind an `RwLock`, a
//! per-type throttle, and the last actual TPS reported by the tick. Trade
//! and price events, and batches carrying trades, go straight out in
//! emission order; everything else is throttled. Endpoints that fail a send are removed and delivery carries on
//! with the rest.

use super::endpoint::{ChannelEndpoint, Endpoint, EndpointId};
use super::event::{EventFrame, EventKind, StreamEvent};
use super::summary::summarize;
use super::throttle::{EventThrottle, ThrottleDecision};
use crate::config::BroadcastConfig;
use crate::core::types::SimulationId;
use crate::monitoring::StreamMetrics;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened to one emitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub kind: EventKind,
    /// Endpoints that accepted the event
    pub delivered: usize,
    /// Endpoints that failed and were removed
    pub failed: usize,
    /// Held back by the throttle
    pub throttled: bool,
    /// Replaced an older pending event of the same type
    pub superseded: bool,
    /// Archetype summary attached
    pub batched: bool,
}

impl DeliveryReport {
    fn empty(kind: EventKind) -> Self {
        Self {
            kind,
            delivered: 0,
            failed: 0,
            throttled: false,
            superseded: false,
            batched: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    pub delivered: u64,
    pub throttled: u64,
    pub superseded: u64,
    pub failures: u64,
    pub channels: usize,
    pub subscribers: usize,
}

struct Channel {
    subscribers: RwLock<Vec<Arc<dyn Endpoint>>>,
    throttle: Mutex<EventThrottle>,
    actual_tps: Mutex<f64>,
}

pub struct BroadcastService {
    cfg: BroadcastConfig,
    channels: DashMap<SimulationId, Arc<Channel>>,
    next_endpoint: AtomicU64,
    metrics: Arc<StreamMetrics>,
    delivered: AtomicU64,
    throttled: AtomicU64,
    superseded: AtomicU64,
    failures: AtomicU64,
}

impl BroadcastService {
    pub fn new(cfg: BroadcastConfig, metrics: Arc<StreamMetrics>) -> Self {
        Self {
            cfg,
            channels: DashMap::new(),
            next_endpoint: AtomicU64::new(1),
            metrics,
            delivered: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn channel(&self, id: &SimulationId) -> Arc<Channel> {
        // clone out so the map shard guard is released immediately
        let interval = Duration::from_millis(self.cfg.throttle_interval_ms);
        self.channels
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(Channel {
                    subscribers: RwLock::new(Vec::new()),
                    throttle: Mutex::new(EventThrottle::new(interval)),
                    actual_tps: Mutex::new(0.0),
                })
            })
            .clone()
    }

    pub fn next_endpoint_id(&self) -> EndpointId {
        self.next_endpoint.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self, id: &SimulationId, endpoint: Arc<dyn Endpoint>) {
        let ch = self.channel(id);
        let endpoint_id = endpoint.id();
        ch.subscribers.write().push(endpoint);
        self.metrics.subscribers.inc();
        debug!(simulation = %id, endpoint = endpoint_id, "subscriber added");
    }

    /// Subscribe a fresh channel endpoint and hand back its receiver
    pub fn subscribe_channel(
        &self,
        id: &SimulationId,
        buffer: usize,
    ) -> (EndpointId, mpsc::Receiver<EventFrame>) {
        let endpoint_id = self.next_endpoint_id();
        let (endpoint, rx) = ChannelEndpoint::new(endpoint_id, buffer);
        self.subscribe(id, Arc::new(endpoint));
        (endpoint_id, rx)
    }

    pub fn unsubscribe(&self, id: &SimulationId, endpoint: EndpointId) -> bool {
        let Some(ch) = self.channels.get(id).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        let mut subs = ch.subscribers.write();
        let before = subs.len();
        subs.retain(|e| e.id() != endpoint);
        let removed = before - subs.len();
        self.metrics.subscribers.sub(removed as f64);
        removed > 0
    }

    pub fn subscriber_count(&self, id: &SimulationId) -> usize {
        self.channels
            .get(id)
            .map(|c| c.subscribers.read().len())
            .unwrap_or(0)
    }

    /// Drop the channel of a deleted simulation
    /// Drop a channel after delivering whatever the throttle still holds
    pub fn remove_channel(&self, id: &SimulationId) {
        if let Some((_, ch)) = self.channels.remove(id) {
            let pending = ch.throttle.lock().drain();
            for event in &pending {
                self.deliver(id, &ch, event);
            }
            if !pending.is_empty() {
                debug!(simulation = %id, events = pending.len(), "pending events flushed on teardown");
            }
            let n = ch.subscribers.read().len();
            self.metrics.subscribers.sub(n as f64);
        }
    }

    /// Latest executed-order rate of a simulation, used for batching
    pub fn set_actual_tps(&self, id: &SimulationId, tps: f64) {
        *self.channel(id).actual_tps.lock() = tps;
    }

    pub fn broadcast_event(&self, id: &SimulationId, event: StreamEvent) -> DeliveryReport {
        self.broadcast_at(id, event, Instant::now())
    }

    pub fn broadcast_at(&self, id: &SimulationId, mut event: StreamEvent, now: Instant) -> DeliveryReport {
        let ch = self.channel(id);
        let mut report = DeliveryReport::empty(event.kind);

        let tps = *ch.actual_tps.lock();
        report.batched = self.attach_summary(&mut event, tps);

        if event.is_immediate() {
            let (delivered, failed) = self.deliver(id, &ch, &event);
            report.delivered = delivered;
            report.failed = failed;
            return report;
        }

        let decision = ch.throttle.lock().offer(event, now);
        match decision {
            ThrottleDecision::Send(event) => {
                let (delivered, failed) = self.deliver(id, &ch, &event);
                report.delivered = delivered;
                report.failed = failed;
            }
            ThrottleDecision::Deferred { superseded } => {
                report.throttled = true;
                report.superseded = superseded;
                self.throttled.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_event(report.kind.as_str(), "throttled", 1);
                if superseded {
                    self.superseded.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_event(report.kind.as_str(), "superseded", 1);
                }
            }
        }
        report
    }

    /// Deliver pending throttled events that are due; returns events sent
    pub fn flush_pending(&self, now: Instant) -> usize {
        let channels: Vec<(SimulationId, Arc<Channel>)> = self
            .channels
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut flushed = 0;
        for (id, ch) in channels {
            let due = ch.throttle.lock().take_due(now);
            for event in due {
                self.deliver(&id, &ch, &event);
                flushed += 1;
            }
        }
        flushed
    }

    /// Periodically flush pending events until the service is dropped
    pub fn spawn_flush_task(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.cfg.flush_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    break;
                };
                service.flush_pending(Instant::now());
            }
        })
    }

    fn attach_summary(&self, event: &mut StreamEvent, actual_tps: f64) -> bool {
        if actual_tps <= self.cfg.high_tps_threshold {
            return false;
        }
        let Some(data) = event.data.as_object_mut() else {
            return false;
        };
        let summary = match data.get("trades") {
            Some(Value::Array(trades)) => summarize(trades),
            _ => return false,
        };
        match serde_json::to_value(summary) {
            Ok(v) => {
                data.insert("archetypeSummary".to_string(), v);
                data.insert("isBatched".to_string(), Value::Bool(true));
                true
            }
            Err(e) => {
                warn!(error = %e, "archetype summary failed to serialize");
                false
            }
        }
    }

    fn deliver(&self, id: &SimulationId, ch: &Channel, event: &StreamEvent) -> (usize, usize) {
        let frame = match EventFrame::encode(event) {
            Ok(f) => f,
            Err(e) => {
                warn!(simulation = %id, event = %event.kind, error = %e, "event failed to encode");
                return (0, 0);
            }
        };

        let mut delivered = 0;
        let mut failed: Vec<EndpointId> = Vec::new();
        {
            let subs = ch.subscribers.read();
            for endpoint in subs.iter() {
                if !endpoint.is_open() {
                    failed.push(endpoint.id());
                    continue;
                }
                match endpoint.send(&frame) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(simulation = %id, error = %e, "removing subscriber after failed delivery");
                        failed.push(endpoint.id());
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut subs = ch.subscribers.write();
            let before = subs.len();
            subs.retain(|e| !failed.contains(&e.id()));
            self.metrics.subscribers.sub((before - subs.len()) as f64);
            self.failures.fetch_add(failed.len() as u64, Ordering::Relaxed);
            self.metrics.delivery_failures_total.inc_by(failed.len() as u64);
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.metrics.record_event(event.kind.as_str(), "delivered", delivered as u64);
        (delivered, failed.len())
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            channels: self.channels.len(),
            subscribers: self
                .channels
                .iter()
                .map(|c| c.subscribers.read().len())
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::SimError;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    fn service() -> BroadcastService {
        BroadcastService::new(BroadcastConfig::default(), Arc::new(StreamMetrics::new().unwrap()))
    }

    struct FlakyEndpoint {
        id: EndpointId,
        fail: AtomicBool,
        sent: AtomicU64,
    }

    impl Endpoint for FlakyEndpoint {
        fn id(&self) -> EndpointId {
            self.id
        }

        fn send(&self, _frame: &EventFrame) -> Result<(), SimError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(SimError::BroadcastDelivery {
                    endpoint: self.id,
                    reason: "socket reset".into(),
                });
            }
            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn trade_event(n: u64) -> StreamEvent {
        StreamEvent::new(EventKind::Trade, n, json!({ "n": n }))
    }

    #[test]
    fn test_hundred_trades_all_delivered_in_order() {
        let svc = service();
        let id = SimulationId::new("a");
        let (_, mut rx) = svc.subscribe_channel(&id, 256);
        for n in 0..100 {
            assert_eq!(svc.broadcast_event(&id, trade_event(n)).delivered, 1);
        }
        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(frame.decode().unwrap().timestamp);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_hundred_throttled_events_bounded() {
        let svc = service();
        let id = SimulationId::new("b");
        let (_, mut rx) = svc.subscribe_channel(&id, 256);
        let t0 = Instant::now();
        for n in 0..100 {
            svc.broadcast_at(&id, StreamEvent::new(EventKind::SimulationState, n, json!({ "n": n })), t0);
        }
        assert_eq!(svc.flush_pending(t0 + Duration::from_millis(100)), 1);

        let frames: Vec<StreamEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.decode().unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data["n"], 0);
        assert_eq!(frames[1].data["n"], 99);

        let stats = svc.stats();
        assert_eq!(stats.throttled, 99);
        assert_eq!(stats.superseded, 98);
    }

    #[test]
    fn test_failed_endpoint_removed_others_continue() {
        let svc = service();
        let id = SimulationId::new("c");
        let bad = Arc::new(FlakyEndpoint {
            id: svc.next_endpoint_id(),
            fail: AtomicBool::new(true),
            sent: AtomicU64::new(0),
        });
        svc.subscribe(&id, bad);
        let (_, mut rx) = svc.subscribe_channel(&id, 8);

        let report = svc.broadcast_event(&id, trade_event(1));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(svc.subscriber_count(&id), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_closed_receiver_is_pruned() {
        let svc = service();
        let id = SimulationId::new("d");
        let (_, rx) = svc.subscribe_channel(&id, 8);
        drop(rx);
        svc.broadcast_event(&id, trade_event(1));
        assert_eq!(svc.subscriber_count(&id), 0);
    }

    #[test]
    fn test_high_tps_attaches_summary_and_keeps_trades() {
        let svc = service();
        let id = SimulationId::new("e");
        let (_, mut rx) = svc.subscribe_channel(&id, 8);
        let data = json!({
            "trades": [
                {"archetype": "MARKET_MAKER", "action": "buy", "value": 10.0, "quantity": 1.0},
                {"archetype": "MARKET_MAKER", "action": "sell", "value": 5.0, "quantity": 0.5}
            ]
        });

        let low = svc.broadcast_event(&id, StreamEvent::new(EventKind::BatchUpdate, 1, data.clone()));
        assert!(!low.batched);

        svc.set_actual_tps(&id, 5_000.0);
        let report = svc.broadcast_event(&id, StreamEvent::new(EventKind::ProcessedTrade, 2, data));
        assert!(report.batched);

        let frames: Vec<StreamEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.decode().unwrap())
            .collect();
        let last = frames.last().unwrap();
        assert_eq!(last.data["isBatched"], true);
        assert_eq!(last.data["trades"].as_array().unwrap().len(), 2);
        assert_eq!(last.data["archetypeSummary"]["totalTrades"], 2);
    }

    #[test]
    fn test_trade_batches_bypass_throttle() {
        let svc = service();
        let id = SimulationId::new("g");
        let (_, mut rx) = svc.subscribe_channel(&id, 64);
        svc.set_actual_tps(&id, 5_000.0);
        let t0 = Instant::now();
        for n in 0..10 {
            let batch = json!({
                "count": 1,
                "trades": [{"archetype": "MARKET_MAKER", "action": "buy", "value": 1.0, "quantity": 1.0}]
            });
            let report = svc.broadcast_at(&id, StreamEvent::new(EventKind::BatchUpdate, n, batch), t0);
            assert!(!report.throttled);
            assert!(report.batched);
        }
        let frames: Vec<StreamEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.decode().unwrap())
            .collect();
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(|f| f.data["archetypeSummary"]["totalTrades"] == 1));
        assert_eq!(svc.stats().throttled, 0);
    }

    #[test]
    fn test_remove_channel_flushes_pending() {
        let svc = service();
        let id = SimulationId::new("h");
        let (_, mut rx) = svc.subscribe_channel(&id, 8);
        let t0 = Instant::now();
        let status = |s: &str| StreamEvent::new(EventKind::SimulationStatus, 1, json!({ "status": s }));
        svc.broadcast_at(&id, status("running"), t0);
        assert!(svc.broadcast_at(&id, status("deleted"), t0).throttled);

        svc.remove_channel(&id);
        let frames: Vec<StreamEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.decode().unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].data["status"], "deleted");
        assert_eq!(svc.subscriber_count(&id), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let svc = service();
        let id = SimulationId::new("f");
        let (ep, _rx) = svc.subscribe_channel(&id, 8);
        assert!(svc.unsubscribe(&id, ep));
        assert!(!svc.unsubscribe(&id, ep));
        assert_eq!(svc.subscriber_count(&id), 0);
    }

    #[tokio::test]
    async fn test_flush_task_delivers_pending() {
        let cfg = BroadcastConfig {
            throttle_interval_ms: 20,
            flush_interval_ms: 5,
            ..Default::default()
        };
        let svc = Arc::new(BroadcastService::new(cfg, Arc::new(StreamMetrics::new().unwrap())));
        let id = SimulationId::new("g");
        let (_, mut rx) = svc.subscribe_channel(&id, 8);
        svc.broadcast_event(&id, StreamEvent::new(EventKind::TimeframeChange, 1, json!({"n": 1})));
        svc.broadcast_event(&id, StreamEvent::new(EventKind::TimeframeChange, 2, json!({"n": 2})));

        let handle = svc.spawn_flush_task();
        let first = rx.recv().await.unwrap().decode().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(first.data["n"], 1);
        assert_eq!(second.data["n"], 2);
        handle.abort();
    }
}
