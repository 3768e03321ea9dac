//! Broadcast guarantees through the registry
//!
//! These tests verify:
//! 1. Immediate events are delivered one-for-one, in emission order
//! 2. Throttled events are bounded per interval, last value wins
//! 3. High-TPS trade lists carry an archetype summary and lose no trades
//! 4. Failing endpoints are removed while delivery continues
//! 5. Subscriber churn during ticks never misroutes an event
//! 6. The background flusher delivers pending events

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickstorm_core::prelude::*;

/// Endpoint that records every frame it receives
struct RecordingEndpoint {
    id: EndpointId,
    frames: Mutex<Vec<EventFrame>>,
}

impl RecordingEndpoint {
    fn new(id: EndpointId) -> Arc<Self> {
        Arc::new(Self {
            id,
            frames: Mutex::new(Vec::new()),
        })
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.frames.lock().iter().map(|f| f.kind).collect()
    }

    fn count(&self, kind: EventKind) -> usize {
        self.frames.lock().iter().filter(|f| f.kind == kind).count()
    }
}

impl Endpoint for RecordingEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn send(&self, frame: &EventFrame) -> Result<(), SimError> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Endpoint that fails every send after `healthy` is cleared
struct FlakyEndpoint {
    id: EndpointId,
    healthy: AtomicBool,
}

impl Endpoint for FlakyEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn send(&self, _frame: &EventFrame) -> Result<(), SimError> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(SimError::BroadcastDelivery {
                endpoint: self.id,
                reason: "socket closed".to_string(),
            })
        }
    }

    fn is_open(&self) -> bool {
        true
    }
}

fn registry() -> SimulationRegistry {
    let mut cfg = CoreConfig::default();
    cfg.rng_seed = Some(5);
    SimulationRegistry::new(cfg).unwrap()
}

fn trade_event(i: u64) -> StreamEvent {
    StreamEvent::new(
        EventKind::Trade,
        i,
        serde_json::json!({ "id": i, "price": 100.0 + i as f64 }),
    )
}

#[cfg(test)]
mod delivery {
    use super::*;

    #[test]
    fn test_hundred_trades_all_delivered_in_order() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();

        let now = Instant::now();
        for i in 0..100 {
            let report = reg.broadcast().broadcast_at(&id, trade_event(i), now);
            assert_eq!(report.delivered, 1);
            assert!(!report.throttled);
        }

        let frames = endpoint.frames.lock();
        assert_eq!(frames.len(), 100);
        let ids: Vec<u64> = frames
            .iter()
            .map(|f| f.decode().unwrap().data["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_hundred_throttled_events_bounded() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();

        let now = Instant::now();
        for i in 0..100 {
            let event = StreamEvent::new(EventKind::SimulationState, i, serde_json::json!({ "seq": i }));
            reg.broadcast().broadcast_at(&id, event, now);
        }
        assert_eq!(endpoint.count(EventKind::SimulationState), 1);

        let later = now + Duration::from_millis(reg.config().broadcast.throttle_interval_ms + 1);
        reg.broadcast().flush_pending(later);
        assert_eq!(endpoint.count(EventKind::SimulationState), 2);

        let last = endpoint.frames.lock().last().unwrap().decode().unwrap();
        assert_eq!(last.data["seq"], 99, "last value wins");
    }

    #[test]
    fn test_tick_stream_order_is_total() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();
        reg.start(&id).unwrap();

        let mut expected = vec![EventKind::SimulationStatus];
        let t0 = Instant::now();
        for i in 0..30u64 {
            let report = reg.advance_at(&id, t0 + Duration::from_millis(i * 10)).unwrap();
            expected.extend(
                report
                    .deliveries
                    .iter()
                    .filter(|d| d.delivered > 0)
                    .map(|d| d.kind),
            );
        }
        assert_eq!(endpoint.kinds(), expected);
        assert_eq!(endpoint.count(EventKind::PriceUpdate), 30);
    }

    #[test]
    fn test_failed_endpoint_removed_others_continue() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let good = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        let flaky = Arc::new(FlakyEndpoint {
            id: reg.broadcast().next_endpoint_id(),
            healthy: AtomicBool::new(true),
        });
        reg.subscribe(&id, flaky.clone()).unwrap();
        reg.subscribe(&id, good.clone()).unwrap();

        let now = Instant::now();
        assert_eq!(reg.broadcast().broadcast_at(&id, trade_event(0), now).delivered, 2);

        flaky.healthy.store(false, Ordering::Relaxed);
        let report = reg.broadcast().broadcast_at(&id, trade_event(1), now);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(reg.broadcast().subscriber_count(&id), 1);

        reg.broadcast().broadcast_at(&id, trade_event(2), now);
        assert_eq!(good.count(EventKind::Trade), 3);
        assert_eq!(reg.broadcast().stats().failures, 1);
    }

    #[test]
    fn test_delete_delivers_final_status() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();
        // the start status takes this interval's slot, so the delete status is held back
        reg.start(&id).unwrap();
        reg.delete(&id).unwrap();

        let statuses: Vec<StreamEvent> = endpoint
            .frames
            .lock()
            .iter()
            .filter(|f| f.kind == EventKind::SimulationStatus)
            .map(|f| f.decode().unwrap())
            .collect();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].data["change"], "deleted");
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();
        assert!(reg.unsubscribe(&id, endpoint.id()));
        assert!(!reg.unsubscribe(&id, endpoint.id()));

        reg.broadcast().broadcast_event(&id, trade_event(0));
        assert!(endpoint.frames.lock().is_empty());
    }
}

#[cfg(test)]
mod churn {
    use super::*;
    use std::thread;

    #[test]
    fn test_subscribe_unsubscribe_while_ticking() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let stable = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, stable.clone()).unwrap();
        reg.start(&id).unwrap();
        let start_frames = stable.frames.lock().len();

        let ticking = AtomicBool::new(true);
        let mut removed: Vec<(Arc<RecordingEndpoint>, usize)> = Vec::new();

        let immediate_sent = thread::scope(|s| {
            let ticker = s.spawn(|| {
                let mut sent = 0;
                for _ in 0..200 {
                    let report = reg.advance(&id).unwrap();
                    sent += report
                        .deliveries
                        .iter()
                        .filter(|d| d.kind.is_immediate() && d.delivered > 0)
                        .count();
                }
                ticking.store(false, Ordering::Release);
                sent
            });

            s.spawn(|| {
                loop {
                    let transient = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
                    reg.subscribe(&id, transient.clone()).unwrap();
                    thread::yield_now();
                    assert!(reg.unsubscribe(&id, transient.id()));
                    let seen = transient.frames.lock().len();
                    removed.push((transient, seen));
                    if !ticking.load(Ordering::Acquire) {
                        break;
                    }
                }
            });

            ticker.join().unwrap()
        });

        // nothing reaches an endpoint once unsubscribe has returned
        assert!(!removed.is_empty());
        for (endpoint, seen) in &removed {
            assert_eq!(endpoint.frames.lock().len(), *seen);
        }

        let immediate_seen = stable.frames.lock()[start_frames..]
            .iter()
            .filter(|f| f.kind.is_immediate())
            .count();
        assert_eq!(immediate_seen, immediate_sent);
        assert_eq!(stable.count(EventKind::PriceUpdate), 200);
        assert_eq!(reg.broadcast().subscriber_count(&id), 1);
    }
}

#[cfg(test)]
mod batching {
    use super::*;

    #[test]
    fn test_high_tps_trades_carry_summary() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();
        reg.start(&id).unwrap();
        reg.set_tps_mode(&id, "HFT").unwrap();

        let report = reg.advance(&id).unwrap();
        let processed = report
            .deliveries
            .iter()
            .find(|d| d.kind == EventKind::ProcessedTrade)
            .unwrap();
        assert!(processed.batched);

        let frame = endpoint
            .frames
            .lock()
            .iter()
            .rev()
            .find(|f| f.kind == EventKind::ProcessedTrade)
            .cloned()
            .unwrap();
        let event = frame.decode().unwrap();
        assert_eq!(event.data["isBatched"], true);
        let summary = &event.data["archetypeSummary"];
        let raw = event.data["trades"].as_array().unwrap().len() as u64;
        assert_eq!(summary["totalTrades"].as_u64().unwrap(), raw);
        assert!(summary["byArchetype"].as_object().unwrap().len() > 1);
    }

    #[test]
    fn test_hft_trader_trades_all_delivered() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let endpoint = RecordingEndpoint::new(reg.broadcast().next_endpoint_id());
        reg.subscribe(&id, endpoint.clone()).unwrap();
        reg.start(&id).unwrap();
        reg.set_tps_mode(&id, "HFT").unwrap();
        reg.set_speed(&id, 50.0).unwrap();

        let t0 = Instant::now();
        let mut produced = 0;
        for i in 0..50u64 {
            let report = reg.advance_at(&id, t0 + Duration::from_millis(i * 20)).unwrap();
            produced += report.tick.trader_trades;
        }
        assert!(produced > 0);

        let frames = endpoint.frames.lock();
        let single = frames.iter().filter(|f| f.kind == EventKind::Trade).count();
        let batches: Vec<StreamEvent> = frames
            .iter()
            .filter(|f| f.kind == EventKind::BatchUpdate)
            .map(|f| f.decode().unwrap())
            .collect();
        let batched: usize = batches
            .iter()
            .map(|e| e.data["trades"].as_array().map_or(0, |t| t.len()))
            .sum();
        assert_eq!(single + batched, produced);
        assert!(!batches.is_empty());
        assert!(batches.iter().all(|e| e.data["isBatched"] == true));
        for e in &batches {
            let listed = e.data["trades"].as_array().unwrap().len() as u64;
            assert_eq!(e.data["archetypeSummary"]["totalTrades"].as_u64(), Some(listed));
        }
    }

    #[test]
    fn test_normal_tps_not_batched() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        reg.start(&id).unwrap();
        for _ in 0..20 {
            let report = reg.advance(&id).unwrap();
            assert!(report.deliveries.iter().all(|d| !d.batched));
        }
    }
}

#[cfg(test)]
mod flusher {
    use super::*;

    #[tokio::test]
    async fn test_flush_task_delivers_pending() {
        let reg = registry();
        let id = reg.create(SimulationParameters::default()).unwrap();
        let (_endpoint, mut rx) = reg.subscribe_channel(&id, 64).unwrap();
        let flusher = reg.broadcast().spawn_flush_task();

        let status = |seq: u64| StreamEvent::new(EventKind::SimulationStatus, seq, serde_json::json!({ "seq": seq }));
        reg.broadcast().broadcast_event(&id, status(1));
        let deferred = reg.broadcast().broadcast_event(&id, status(2));
        assert!(deferred.throttled);

        let first = rx.recv().await.unwrap().decode().unwrap();
        assert_eq!(first.data["seq"], 1);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(second.data["seq"], 2);

        flusher.abort();
    }
}
