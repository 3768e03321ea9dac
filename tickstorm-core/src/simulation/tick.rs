//! One tick of a simulation
//!
//! Order of work inside `advance`:
//!
//! ```text
//! time → scenario → price walk → trader decisions → external flow
//!      → candles → mark P&L → conditions → order book → analysis
//!      → events → tick duration → end check → pool health
//! ```
//!
//! The caller holds the simulation lock for the whole call and broadcasts
//! the returned events in order before releasing it.

use crate::analysis::{AnalysisInput, MarketAnalyzer};
use crate::broadcast::{EventKind, StreamEvent};
use crate::config::CoreConfig;
use crate::core::types::{
    signed_pnl_pct, ClosedPosition, ExitReason, Trade, TradeAction, TraderId, TraderPosition,
};
use crate::engine::{MarketSnapshot, TraderDecision};
use crate::market::{build_order_book, derive_conditions, step_price, ActiveScenario, GenerationReport, WalkParams};
use crate::perf::PerformanceOptimizer;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::state::SimulationState;

/// Trades considered when deriving momentum
const CONDITION_TRADES: usize = 100;

/// Registry-owned collaborators a tick runs against
pub struct TickContext<'a> {
    pub cfg: &'a CoreConfig,
    pub optimizer: &'a PerformanceOptimizer,
    pub analyzer: &'a MarketAnalyzer,
}

/// What one call to `advance` did
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// False when the simulation was stopped or paused
    pub advanced: bool,
    /// Events to broadcast, in emission order
    pub events: Vec<StreamEvent>,
    pub decisions: usize,
    pub parallel: bool,
    pub failed_sub_batches: usize,
    pub trader_trades: usize,
    pub generation: GenerationReport,
    pub processed: usize,
    pub ended: bool,
    /// Pools force-reclaimed at the end of the tick
    pub reclaimed: Vec<&'static str>,
    pub elapsed: Duration,
}

pub fn advance(state: &mut SimulationState, ctx: &TickContext<'_>, now: Instant) -> TickOutcome {
    let mut out = TickOutcome::default();
    if !state.running || state.paused {
        return out;
    }
    let started = Instant::now();
    out.advanced = true;

    state.apply_pool_multiplier(ctx.optimizer.pool_capacity_multiplier());

    let tick_ms = ctx.cfg.simulation.tick_interval_ms;
    let sim_elapsed = ((tick_ms as f64) * state.speed).round().max(1.0) as u64;
    state.current_time = state.current_time.saturating_add(sim_elapsed).min(state.end_time);
    state.tick_count += 1;
    let ts = state.current_time;
    let previous_price = state.current_price;

    advance_scenario(state, ctx.optimizer, &mut out.events);
    walk_price(state, sim_elapsed);

    let mut tick_volume = 0.0;
    let trader_trades = apply_decisions(state, ctx, &mut out);
    tick_volume += trader_trades.iter().map(|t| t.value).sum::<f64>();

    out.generation = state.generator.generate(
        state.tps.profile(),
        state.current_price,
        state.conditions.trend,
        ts,
        tick_ms,
        &mut state.rng,
    );
    let processed = state.generator.process_tick(
        state.tps.profile(),
        tick_ms,
        &mut state.current_price,
        ts,
        &mut state.trade_pool,
        &mut state.next_trade_id,
    );
    out.processed = processed.len();
    let processed_view: Vec<Trade> = processed.iter().map(|t| t.get().clone()).collect();
    tick_volume += processed_view.iter().map(|t| t.value).sum::<f64>();
    for trade in processed {
        state.push_trade(trade);
    }

    state.candles.update(ts, state.current_price, tick_volume);
    let price = state.current_price;
    for position in state.active_positions.values_mut() {
        position.mark(price);
    }
    state.conditions = derive_conditions(
        &state.candles,
        state.recent_trades.iter().rev().take(CONDITION_TRADES).map(|t| t.get()),
    );
    state.order_book = build_order_book(
        price,
        ctx.cfg.simulation.order_book_depth,
        state.conditions.volatility,
        ts,
        &mut state.rng,
    );

    adapt_timeframe(state, ctx.analyzer, now, &mut out.events);
    emit_market_events(state, ctx, previous_price, trader_trades, processed_view, &mut out.events);

    out.elapsed = started.elapsed();
    ctx.optimizer.record_tick_duration(out.elapsed);

    if state.has_ended() {
        state.running = false;
        out.ended = true;
        info!(simulation = %state.id, ticks = state.tick_count, "simulation reached its end time");
        out.events.push(StreamEvent::new(
            EventKind::SimulationStatus,
            ts,
            json!({
                "status": "ended",
                "currentTime": ts,
                "endTime": state.end_time,
                "tickCount": state.tick_count,
                "finalPrice": state.current_price,
            }),
        ));
    }

    reclaim_unhealthy_pools(state, &mut out.reclaimed);
    debug!(
        simulation = %state.id,
        tick = state.tick_count,
        decisions = out.decisions,
        trader_trades = out.trader_trades,
        processed = out.processed,
        elapsed_us = out.elapsed.as_micros() as u64,
        "tick complete"
    );
    out
}

fn advance_scenario(state: &mut SimulationState, optimizer: &PerformanceOptimizer, events: &mut Vec<StreamEvent>) {
    let ts = state.current_time;
    let finished = match state.scenario.as_mut() {
        Some(scenario) => {
            if let Some(change) = scenario.advance(ts) {
                events.push(StreamEvent::new(
                    EventKind::ScenarioPhaseChanged,
                    ts,
                    json!({
                        "name": scenario.spec.name,
                        "from": change.from,
                        "to": change.to,
                        "intensity": change.to.intensity(),
                    }),
                ));
            }
            scenario.is_finished(ts)
        }
        None => false,
    };

    if finished {
        if let Some(scenario) = state.scenario.take() {
            events.push(finish_scenario(state, scenario, optimizer, "completed"));
        }
    }
}

/// Close out a scenario, restoring the TPS mode it replaced
pub fn finish_scenario(
    state: &mut SimulationState,
    scenario: ActiveScenario,
    optimizer: &PerformanceOptimizer,
    reason: &str,
) -> StreamEvent {
    if let Some(previous) = scenario.previous_mode {
        state.tps.set_mode(previous, optimizer);
    }
    info!(simulation = %state.id, scenario = %scenario.spec.name, reason, "scenario finished");
    StreamEvent::new(
        EventKind::ScenarioCleared,
        state.current_time,
        json!({
            "name": scenario.spec.name,
            "reason": reason,
            "tpsMode": state.tps.mode(),
        }),
    )
}

fn walk_price(state: &mut SimulationState, sim_elapsed: u64) {
    let scenario = state.scenario.as_ref();
    let params = WalkParams {
        volatility: state.params.price.volatility,
        drift: state.params.price.drift,
        trend: state.conditions.trend,
        volatility_multiplier: scenario.map_or(1.0, |s| s.volatility_multiplier()),
        scenario_drift: scenario.map_or(0.0, |s| s.drift_per_minute()),
    };
    state.current_price = step_price(state.current_price, &params, sim_elapsed, &mut state.rng);
}

/// Run the decision batch and apply it; returns the trader trades made
fn apply_decisions(state: &mut SimulationState, ctx: &TickContext<'_>, out: &mut TickOutcome) -> Vec<Trade> {
    let inputs = state.decision_inputs();
    let snapshot = MarketSnapshot {
        price_history: state.candles.closes(ctx.cfg.decisions.lookback_candles.max(1)),
        current_price: state.current_price,
        trend: state.conditions.trend,
        timestamp: state.current_time,
    };
    let batch = ctx.optimizer.process_decisions(
        inputs,
        &snapshot,
        &ctx.cfg.decisions,
        state.speed,
        &mut state.rng,
    );
    out.decisions = batch.decisions.len();
    out.parallel = batch.parallel;
    out.failed_sub_batches = batch.failed_sub_batches;

    let depth = ctx.cfg.generator.market_depth_usd;
    let mut trades = Vec::new();
    for decision in batch.decisions {
        let trade = match decision {
            TraderDecision::Enter { trader_id, quantity, .. } => open_position(state, trader_id, quantity, depth),
            TraderDecision::Exit { trader_id, reason, .. } => close_position(state, trader_id, reason, depth),
            TraderDecision::Hold { .. } => None,
        };
        trades.extend(trade);
    }
    out.trader_trades = trades.len();
    trades
}

fn open_position(state: &mut SimulationState, trader_id: TraderId, quantity: f64, depth: f64) -> Option<Trade> {
    // decisions were taken against a snapshot; skip ones the state no longer allows
    if quantity == 0.0 || !quantity.is_finite() || state.active_positions.contains_key(&trader_id) {
        return None;
    }
    let price = state.current_price;
    let mut position = state.position_pool.acquire();
    *position = TraderPosition {
        trader_id,
        entry_price: price,
        entry_time: state.current_time,
        quantity,
        unrealized_pnl: 0.0,
        unrealized_pnl_pct: 0.0,
    };
    state.active_positions.insert(trader_id, position);

    let action = if quantity > 0.0 { TradeAction::Buy } else { TradeAction::Sell };
    Some(record_trader_trade(state, trader_id, action, quantity.abs(), depth))
}

fn close_position(state: &mut SimulationState, trader_id: TraderId, reason: ExitReason, depth: f64) -> Option<Trade> {
    let position = state.active_positions.remove(&trader_id)?;
    let price = state.current_price;
    let realized_pnl = (price - position.entry_price) * position.quantity;
    let closed = ClosedPosition {
        trader_id,
        entry_price: position.entry_price,
        exit_price: price,
        entry_time: position.entry_time,
        exit_time: state.current_time,
        quantity: position.quantity,
        realized_pnl,
        pnl_pct: signed_pnl_pct(position.entry_price, price, position.quantity),
        reason,
    };
    let quantity = position.quantity.abs();
    let action = if position.is_long() { TradeAction::Sell } else { TradeAction::Buy };
    state.position_pool.release(position);

    if let Some(profile) = state.traders.iter_mut().find(|p| p.id() == trader_id) {
        profile.stats.record_close(realized_pnl, quantity * price);
    }
    state.push_closed(closed);
    Some(record_trader_trade(state, trader_id, action, quantity, depth))
}

/// Execute a trader fill at the current price and move the price by its impact
fn record_trader_trade(
    state: &mut SimulationState,
    trader_id: TraderId,
    action: TradeAction,
    quantity: f64,
    depth: f64,
) -> Trade {
    let price = state.current_price;
    let value = quantity * price;
    let impact = if depth > 0.0 { action.sign() * value / depth } else { 0.0 };
    state.current_price = (price * (1.0 + impact / 100.0)).max(f64::MIN_POSITIVE);

    let mut trade = state.trade_pool.acquire();
    *trade = Trade {
        id: state.next_trade_id,
        timestamp: state.current_time,
        trader_id: Some(trader_id),
        archetype: None,
        action,
        price,
        quantity,
        value,
        impact,
    };
    state.next_trade_id += 1;
    let view = trade.get().clone();
    state.push_trade(trade);
    view
}

/// Analyzer input cut from the current state
pub fn analysis_input(state: &SimulationState, analyzer: &MarketAnalyzer) -> AnalysisInput {
    AnalysisInput {
        candles: state.candles.recent(analyzer.candle_window()),
        trades_in_window: state.trades_within(analyzer.intensity_window_ms()),
        current_price: state.current_price,
        sim_time: state.current_time,
        scenario_active: state.scenario.is_some(),
        current_timeframe: state.timeframe,
    }
}

fn adapt_timeframe(state: &mut SimulationState, analyzer: &MarketAnalyzer, now: Instant, events: &mut Vec<StreamEvent>) {
    let input = analysis_input(state, analyzer);
    let analysis = analyzer.analyze_at(&state.id, &input, now);

    // a cached analysis can still flag a change that was already applied
    if analysis.should_adapt && analysis.recommended_timeframe != state.timeframe {
        let from = state.timeframe;
        state.timeframe = analysis.recommended_timeframe;
        info!(
            simulation = %state.id,
            from = %from,
            to = %state.timeframe,
            condition = ?analysis.condition,
            "display timeframe adapted"
        );
        events.push(StreamEvent::new(
            EventKind::TimeframeChange,
            state.current_time,
            json!({
                "from": from,
                "to": state.timeframe,
                "rationale": analysis.rationale,
                "analysis": analysis,
            }),
        ));
    }
}

fn emit_market_events(
    state: &SimulationState,
    ctx: &TickContext<'_>,
    previous_price: f64,
    trader_trades: Vec<Trade>,
    processed: Vec<Trade>,
    events: &mut Vec<StreamEvent>,
) {
    let ts = state.current_time;
    let metrics = state.generator.metrics();
    let high_tps = metrics.actual_tps > ctx.cfg.broadcast.high_tps_threshold;

    if high_tps && !trader_trades.is_empty() {
        events.push(StreamEvent::new(
            EventKind::BatchUpdate,
            ts,
            json!({
                "count": trader_trades.len(),
                "trades": trader_trades,
                "tpsMode": state.mode(),
            }),
        ));
    } else {
        for trade in &trader_trades {
            events.push(StreamEvent::from_payload(EventKind::Trade, ts, trade));
        }
    }

    if !processed.is_empty() {
        events.push(StreamEvent::new(
            EventKind::ProcessedTrade,
            ts,
            json!({
                "count": processed.len(),
                "trades": processed,
                "tpsMode": state.mode(),
            }),
        ));
    }

    let change_pct = if previous_price > 0.0 {
        (state.current_price - previous_price) / previous_price * 100.0
    } else {
        0.0
    };
    events.push(StreamEvent::new(
        EventKind::PriceUpdate,
        ts,
        json!({
            "price": state.current_price,
            "previousPrice": previous_price,
            "changePct": change_pct,
            "candle": state.candles.last(),
            "orderBook": state.order_book,
            "marketConditions": state.conditions,
        }),
    ));

    events.push(StreamEvent::from_payload(EventKind::ExternalMarketMetrics, ts, metrics));

    events.push(StreamEvent::new(
        EventKind::SimulationState,
        ts,
        json!({
            "status": state.status(),
            "currentTime": ts,
            "currentPrice": state.current_price,
            "speed": state.speed,
            "tickCount": state.tick_count,
            "activePositions": state.active_positions.len(),
            "closedPositions": state.closed_positions.len(),
            "tpsMode": state.mode(),
            "timeframe": state.timeframe,
        }),
    ));
}

fn reclaim_unhealthy_pools(state: &mut SimulationState, reclaimed: &mut Vec<&'static str>) {
    let health = state.pool_health();
    if !health.trades.healthy {
        warn!(
            simulation = %state.id,
            leak = health.trades.leak,
            cross_pool = health.trades.cross_pool_attempts,
            "trade pool unhealthy, reclaiming"
        );
        state.trade_pool.force_reclaim();
        reclaimed.push(health.trades.name);
    }
    if !health.positions.healthy {
        warn!(
            simulation = %state.id,
            leak = health.positions.leak,
            cross_pool = health.positions.cross_pool_attempts,
            "position pool unhealthy, reclaiming"
        );
        state.position_pool.force_reclaim();
        reclaimed.push(health.positions.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tps_fsm::TpsMode;
    use crate::core::types::SimulationId;
    use crate::market::ScenarioSpec;
    use crate::perf::PoolTagSource;
    use crate::simulation::state::SimulationParameters;

    struct Fixture {
        cfg: CoreConfig,
        optimizer: PerformanceOptimizer,
        analyzer: MarketAnalyzer,
    }

    impl Fixture {
        fn new(cfg: CoreConfig) -> Self {
            let optimizer = PerformanceOptimizer::new(&cfg.workers, &cfg.batching);
            let analyzer = MarketAnalyzer::new(cfg.analysis.clone());
            Self { cfg, optimizer, analyzer }
        }

        fn ctx(&self) -> TickContext<'_> {
            TickContext {
                cfg: &self.cfg,
                optimizer: &self.optimizer,
                analyzer: &self.analyzer,
            }
        }

        fn state(&self, params: SimulationParameters) -> SimulationState {
            SimulationState::new(
                SimulationId::new("tick"),
                params,
                &self.cfg,
                self.cfg.mode_profiles().unwrap(),
                &PoolTagSource::new(),
                42,
            )
        }
    }

    fn kinds(events: &[StreamEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_stopped_simulation_does_not_advance() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters::default());
        let out = advance(&mut s, &fx.ctx(), Instant::now());
        assert!(!out.advanced);
        assert!(out.events.is_empty());
        assert_eq!(s.current_time, s.start_time);

        s.running = true;
        s.paused = true;
        assert!(!advance(&mut s, &fx.ctx(), Instant::now()).advanced);
    }

    #[test]
    fn test_tick_advances_time_by_speed() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters {
            speed: 4.0,
            ..Default::default()
        });
        s.running = true;
        let out = advance(&mut s, &fx.ctx(), Instant::now());
        assert!(out.advanced);
        assert_eq!(s.current_time - s.start_time, fx.cfg.simulation.tick_interval_ms * 4);
        assert_eq!(s.tick_count, 1);

        let k = kinds(&out.events);
        assert!(k.contains(&EventKind::PriceUpdate));
        assert!(k.contains(&EventKind::ExternalMarketMetrics));
        assert!(k.contains(&EventKind::SimulationState));
    }

    #[test]
    fn test_trade_accounting_balances_pool() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters::default());
        s.running = true;
        for _ in 0..200 {
            advance(&mut s, &fx.ctx(), Instant::now());
        }
        let health = s.pool_health();
        assert_eq!(health.trades.leak as usize, s.recent_trades.len());
        assert_eq!(health.positions.leak as usize, s.active_positions.len());
        assert!(s.recent_trades.len() <= fx.cfg.simulation.recent_trades_capacity);

        s.release_all();
        assert_eq!(s.pool_health().trades.leak, 0);
        assert_eq!(s.pool_health().positions.leak, 0);
    }

    #[test]
    fn test_simulation_ends_at_end_time() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters {
            duration_ms: fx.cfg.simulation.tick_interval_ms * 3,
            ..Default::default()
        });
        s.running = true;
        let mut ended = None;
        for i in 0..10 {
            let out = advance(&mut s, &fx.ctx(), Instant::now());
            if out.ended {
                assert_eq!(out.events.last().map(|e| e.kind), Some(EventKind::SimulationStatus));
                ended = Some(i);
                break;
            }
        }
        assert_eq!(ended, Some(2));
        assert!(!s.running);
        assert_eq!(s.current_time, s.end_time);
        assert!(!advance(&mut s, &fx.ctx(), Instant::now()).advanced);
    }

    #[test]
    fn test_scenario_phases_and_restores_mode() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters::default());
        s.running = true;
        let spec = ScenarioSpec {
            name: "squeeze".to_string(),
            duration_ms: fx.cfg.simulation.tick_interval_ms * 8,
            volatility_multiplier: 3.0,
            drift_per_minute: 0.01,
            tps_mode: Some(TpsMode::Burst),
        };
        s.tps.set_mode(TpsMode::Burst, &fx.optimizer);
        s.scenario = Some(ActiveScenario::start(spec, s.current_time, Some(TpsMode::Normal)));

        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.extend(kinds(&advance(&mut s, &fx.ctx(), Instant::now()).events));
        }
        assert!(seen.contains(&EventKind::ScenarioPhaseChanged));
        assert!(seen.contains(&EventKind::ScenarioCleared));
        assert!(s.scenario.is_none());
        assert_eq!(s.mode(), TpsMode::Normal);
    }

    #[test]
    fn test_scenario_switches_to_fine_timeframe() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters::default());
        s.running = true;
        let spec = ScenarioSpec {
            name: "flash".to_string(),
            duration_ms: 60 * 60 * 1_000,
            volatility_multiplier: 1.0,
            drift_per_minute: 0.0,
            tps_mode: None,
        };
        s.scenario = Some(ActiveScenario::start(spec, s.current_time, None));

        let out = advance(&mut s, &fx.ctx(), Instant::now());
        assert!(kinds(&out.events).contains(&EventKind::TimeframeChange));
        assert_eq!(s.timeframe, fx.cfg.analysis.fine_timeframe);

        // cached analysis inside the TTL must not re-emit the change
        let again = advance(&mut s, &fx.ctx(), Instant::now());
        assert!(!kinds(&again.events).contains(&EventKind::TimeframeChange));
    }

    #[test]
    fn test_exit_updates_stats_and_history() {
        let fx = Fixture::new(CoreConfig::default());
        let mut s = fx.state(SimulationParameters::default());
        let id = s.traders[0].id();
        let trade = open_position(&mut s, id, 2.0, 1_000_000.0).unwrap();
        assert_eq!(trade.action, TradeAction::Buy);
        assert!(open_position(&mut s, id, 2.0, 1_000_000.0).is_none());

        let exit = close_position(&mut s, id, ExitReason::TakeProfit, 1_000_000.0).unwrap();
        assert_eq!(exit.action, TradeAction::Sell);
        assert!(s.active_positions.is_empty());
        assert_eq!(s.closed_positions.len(), 1);
        assert_eq!(s.traders[0].stats.trades, 1);
        assert_eq!(s.position_pool.stats().leak, 0);
        assert!(close_position(&mut s, id, ExitReason::StopLoss, 1_000_000.0).is_none());
    }
}
