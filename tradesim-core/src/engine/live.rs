//! Live trading engine: the same composition as the backtest loop, driven
//! by a push stream of ticks.
//!
//! Single-writer model: one actor thread owns the ledger, tracker, and
//! risk manager. Market-data and broker code never touch shared state —
//! they enqueue [`EngineEvent`]s into an ordered mailbox which the actor
//! drains sequentially, so fills apply in broker-report order and stops
//! are evaluated before new signals on every tick.

use crate::broker::{AckStatus, Broker, FillNotice, PaperBroker};
use crate::config::EngineConfig;
use crate::domain::fill::{FillReport, FillStatus};
use crate::domain::ids::{IdGen, OrderId};
use crate::domain::order::{Order, OrderSide, OrderState, OrderType};
use crate::domain::portfolio::Portfolio;
use crate::domain::signal::SignalAction;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::trade::CompletedTrade;
use crate::engine::health::{FailureTracker, HealthSnapshot, HealthStatus};
use crate::engine::metrics::EngineMetrics;
use crate::engine::EngineError;
use crate::orders::audit::{AuditEvent, OrderAuditLog};
use crate::orders::validator::OrderValidator;
use crate::risk::manager::RiskManager;
use crate::sizers::Sizer;
use crate::strategy::Strategy;
use crate::tracker::equity::EquityTracker;
use crate::tracker::trade_tracker::{TradeTracker, TrackerError};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything that can land in the engine mailbox.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick {
        symbol: String,
        price: f64,
        timestamp: NaiveDateTime,
    },
    BrokerFill(FillNotice),
    ResetBreaker,
    /// Force a health snapshot write now.
    Snapshot,
    Shutdown,
}

/// Final accounting returned when the live engine stops.
#[derive(Debug, Clone)]
pub struct LiveSummary {
    pub initial_capital: f64,
    pub final_value: f64,
    pub metrics: EngineMetrics,
    pub trades: Vec<CompletedTrade>,
    pub equity_curve: Vec<(NaiveDateTime, f64)>,
}

struct PendingOrder {
    order: Order,
    exchange_id: String,
    signal_stop: Option<f64>,
}

/// The live engine actor. All state lives here; only the owning thread
/// ever touches it.
pub struct LiveEngine {
    config: EngineConfig,
    broker: Box<dyn Broker>,
    validator: OrderValidator,
    risk: RiskManager,
    sizer: Box<dyn Sizer>,
    portfolio: Portfolio,
    tracker: TradeTracker,
    equity: EquityTracker,
    id_gen: IdGen,
    metrics: EngineMetrics,
    current_prices: HashMap<String, f64>,
    /// Orders acknowledged by the broker, awaiting fill notices.
    pending: BTreeMap<OrderId, PendingOrder>,
    /// Last non-HOLD emission per symbol with its timestamp, for the
    /// cooldown dedup filter.
    last_signal: BTreeMap<String, (SignalAction, NaiveDateTime)>,
    session_date: Option<NaiveDate>,
    status: HealthStatus,
    failures: FailureTracker,
    audit: Option<OrderAuditLog>,
    started: Instant,
    last_snapshot: Option<NaiveDateTime>,
    last_status: Option<NaiveDateTime>,
}

impl LiveEngine {
    pub fn new(config: EngineConfig, broker: Box<dyn Broker>) -> Result<Self, EngineError> {
        let audit = match (&config.order_log_path, config.log_orders) {
            (Some(path), true) => Some(OrderAuditLog::open(path)?),
            _ => None,
        };
        Ok(Self {
            validator: OrderValidator::new(config.risk.clone()),
            risk: RiskManager::new(config.stops.clone(), config.initial_capital),
            sizer: Box::new(crate::sizers::PercentSizer::new(0.10)),
            portfolio: Portfolio::new(config.initial_capital),
            tracker: TradeTracker::new(),
            equity: EquityTracker::new(),
            id_gen: IdGen::default(),
            metrics: EngineMetrics::default(),
            current_prices: HashMap::new(),
            pending: BTreeMap::new(),
            last_signal: BTreeMap::new(),
            session_date: None,
            status: HealthStatus::Initializing,
            failures: FailureTracker::new(),
            audit,
            started: Instant::now(),
            last_snapshot: None,
            last_status: None,
            broker,
            config,
        })
    }

    pub fn with_sizer(mut self, sizer: Box<dyn Sizer>) -> Self {
        self.sizer = sizer;
        self
    }

    /// Spawn the actor thread, consuming the engine. Events arrive on
    /// `events`; the thread runs until a Shutdown event (or a disconnected
    /// mailbox) and returns the final summary.
    pub fn spawn(
        mut self,
        mut strategy: Box<dyn Strategy>,
        events: Receiver<EngineEvent>,
    ) -> JoinHandle<Result<LiveSummary, EngineError>> {
        std::thread::Builder::new()
            .name("tradesim-live".into())
            .spawn(move || self.run(strategy.as_mut(), events))
            .expect("failed to spawn live engine thread")
    }

    /// Convenience wiring for paper/dry-run mode: a [`PaperBroker`] echoes
    /// fills straight back into the mailbox.
    pub fn start_paper(
        config: EngineConfig,
        strategy: Box<dyn Strategy>,
        sizer: Box<dyn Sizer>,
    ) -> Result<LiveHandle, EngineError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let broker = PaperBroker::new(tx.clone());
        let engine = LiveEngine::new(config, Box::new(broker))?.with_sizer(sizer);
        let join = engine.spawn(strategy, rx);
        Ok(LiveHandle { tx, join })
    }

    fn run(
        &mut self,
        strategy: &mut dyn Strategy,
        events: Receiver<EngineEvent>,
    ) -> Result<LiveSummary, EngineError> {
        self.status = HealthStatus::Running;
        info!(
            initial_capital = self.config.initial_capital,
            paper = self.config.trading.paper_mode,
            dry_run = self.config.trading.dry_run,
            "live engine started"
        );

        let mut result = Ok(());
        loop {
            match events.recv() {
                Ok(EngineEvent::Shutdown) | Err(_) => break,
                Ok(event) => {
                    if let Err(err) = self.handle_event(event, strategy) {
                        error!(error = %err, "fatal engine error; stopping");
                        self.status = HealthStatus::Degraded;
                        result = Err(err);
                        break;
                    }
                }
            }
        }

        // Drain whatever is already queued (late broker fills first and
        // foremost) before tearing down.
        while let Ok(event) = events.try_recv() {
            match event {
                EngineEvent::Shutdown => {}
                event => {
                    if result.is_ok() {
                        if let Err(err) = self.handle_event(event, strategy) {
                            error!(error = %err, "fatal engine error during drain");
                            self.status = HealthStatus::Degraded;
                            result = Err(err);
                        }
                    }
                }
            }
        }

        self.teardown();
        result.map(|_| LiveSummary {
            initial_capital: self.config.initial_capital,
            final_value: self.portfolio.total_value(),
            metrics: self.metrics,
            trades: self.tracker.trades().to_vec(),
            equity_curve: self.equity.series().to_vec(),
        })
    }

    fn handle_event(
        &mut self,
        event: EngineEvent,
        strategy: &mut dyn Strategy,
    ) -> Result<(), EngineError> {
        match event {
            EngineEvent::Tick { symbol, price, timestamp } => {
                self.on_tick(&symbol, price, timestamp, strategy)
            }
            EngineEvent::BrokerFill(notice) => self.on_broker_fill(&notice),
            EngineEvent::ResetBreaker => {
                self.risk.reset_breaker();
                Ok(())
            }
            EngineEvent::Snapshot => {
                let ts = self.last_snapshot.unwrap_or_default();
                self.write_snapshot(ts)
            }
            EngineEvent::Shutdown => Ok(()),
        }
    }

    fn on_tick(
        &mut self,
        symbol: &str,
        price: f64,
        ts: NaiveDateTime,
        strategy: &mut dyn Strategy,
    ) -> Result<(), EngineError> {
        self.metrics.ticks += 1;
        self.roll_session(ts);
        self.current_prices.insert(symbol.to_string(), price);
        self.portfolio.mark_to_market(&self.current_prices);

        // Stops before signals, always.
        let equity_now = self.portfolio.total_value();
        let exits =
            self.risk
                .check_stops(&self.current_prices, equity_now, &self.portfolio, ts);
        for exit in exits {
            self.metrics.stops_triggered += 1;
            let held = self.portfolio.position_quantity(&exit.symbol);
            if held <= 0 {
                continue;
            }
            let reference = self
                .current_prices
                .get(&exit.symbol)
                .copied()
                .unwrap_or(exit.trigger_price);
            warn!(
                symbol = %exit.symbol,
                reason = exit.reason.as_str(),
                trigger = exit.trigger_price,
                "stop-loss exit"
            );
            self.submit_live(
                ts,
                &exit.symbol,
                OrderSide::Sell,
                exit.quantity.min(held as u64),
                reference,
                None,
            )?;
        }

        if self.risk.breaker_tripped() {
            if self.metrics.ticks % 100 == 0 {
                warn!("circuit breaker active; new entries halted");
            }
        } else {
            let snapshot = MarketSnapshot {
                timestamp: ts,
                prices: self.current_prices.clone(),
                bars: HashMap::new(),
            };
            let signals = strategy.generate_signals(&snapshot);
            for signal in signals {
                if signal.action == SignalAction::Hold {
                    continue;
                }
                if self.is_duplicate(&signal.symbol, signal.action, ts) {
                    continue;
                }
                self.last_signal
                    .insert(signal.symbol.clone(), (signal.action, ts));
                self.metrics.signals_generated += 1;

                let side = match signal.action {
                    SignalAction::Buy => OrderSide::Buy,
                    SignalAction::Sell => OrderSide::Sell,
                    SignalAction::Hold => continue,
                };
                let reference = self
                    .current_prices
                    .get(&signal.symbol)
                    .copied()
                    .unwrap_or(signal.price);
                let sized = self.sizer.quantity(&signal, &self.portfolio, reference);
                let qty = match side {
                    OrderSide::Buy => sized,
                    OrderSide::Sell => {
                        let held = self.portfolio.position_quantity(&signal.symbol);
                        if held <= 0 {
                            continue;
                        }
                        // Exit the full position on a sell signal.
                        held as u64
                    }
                };
                if qty == 0 {
                    continue;
                }
                info!(action = ?signal.action, symbol = %signal.symbol, qty, reference, "signal");
                self.submit_live(ts, &signal.symbol, side, qty, reference, signal.stop_loss)?;
            }
        }

        self.equity.record(ts, self.portfolio.total_value());
        self.maybe_snapshot(ts)?;
        self.maybe_log_status(ts);
        Ok(())
    }

    /// Drop signals repeating the previous action for the symbol within
    /// the configured cooldown.
    fn is_duplicate(&self, symbol: &str, action: SignalAction, ts: NaiveDateTime) -> bool {
        self.last_signal.get(symbol).is_some_and(|&(last_action, last_ts)| {
            last_action == action
                && (ts - last_ts).num_seconds() < self.config.signal_cooldown_secs as i64
        })
    }

    fn submit_live(
        &mut self,
        ts: NaiveDateTime,
        symbol: &str,
        side: OrderSide,
        qty: u64,
        reference: f64,
        signal_stop: Option<f64>,
    ) -> Result<(), EngineError> {
        let id = self.id_gen.next_order_id();
        let mut order = Order::new(
            id,
            symbol,
            side,
            OrderType::Market,
            qty,
            self.config.default_tif(),
            ts,
        );

        if let Err(rejection) = self.validator.validate(
            ts,
            symbol,
            side,
            qty,
            reference,
            &self.portfolio,
            &self.current_prices,
        ) {
            order.reject()?;
            self.metrics.orders_rejected += 1;
            self.audit_event(ts, &order, AuditEvent::Rejected, reference, Some(rejection.code.as_str()))?;
            return Ok(());
        }

        if !self.config.trading.enable_trading {
            // Order flow is disabled: record the intent, submit nothing.
            debug!(order_id = %order.id, symbol, "trading disabled; order not submitted");
            order.acknowledge()?;
            order.cancel()?;
            self.audit_event(ts, &order, AuditEvent::Canceled, reference, Some("trading_disabled"))?;
            return Ok(());
        }

        if let Some(audit) = self.audit.as_mut() {
            audit.order_sent(ts, &order, reference)?;
        }

        let deadline = Duration::from_secs(self.config.submit_deadline_secs);
        match self.broker.submit(&order, reference, deadline) {
            Ok(ack) if ack.status == AckStatus::Accepted => {
                order.acknowledge()?;
                self.validator.record_order(ts, symbol);
                self.metrics.orders_submitted += 1;
                if let Some(audit) = self.audit.as_mut() {
                    audit.record(
                        ts,
                        AuditEvent::Acked,
                        order.id.0,
                        Some(&ack.exchange_id),
                        symbol,
                        side,
                        qty,
                        0,
                        reference,
                        None,
                        None,
                    )?;
                }
                self.pending.insert(
                    order.id,
                    PendingOrder { order, exchange_id: ack.exchange_id, signal_stop },
                );
            }
            Ok(ack) => {
                order.reject()?;
                self.metrics.orders_rejected += 1;
                let reason = ack.message.unwrap_or_else(|| "broker_rejected".into());
                warn!(order_id = %order.id, %reason, "broker rejected order");
                self.audit_event(ts, &order, AuditEvent::Rejected, reference, Some(&reason))?;
            }
            Err(err) => {
                // Timeout or transport failure: reject locally, never
                // credit the ledger. Repeated failures degrade the engine.
                order.reject()?;
                self.metrics.orders_rejected += 1;
                error!(order_id = %order.id, error = %err, "broker submission failed");
                self.audit_event(ts, &order, AuditEvent::Rejected, reference, Some("broker_error"))?;
                let count = self.failures.record_failure(ts);
                if self.failures.is_critical(count) {
                    warn!(count, "broker failure threshold reached; engine degraded");
                    self.status = HealthStatus::Degraded;
                }
            }
        }
        Ok(())
    }

    /// Fold an asynchronous broker fill back through the tracker and the
    /// ledger. State-machine violations abort the offending order and the
    /// engine keeps running; tracker/ledger divergence is fatal.
    fn on_broker_fill(&mut self, notice: &FillNotice) -> Result<(), EngineError> {
        let Some(mut pending) = self.pending.remove(&notice.client_order_id) else {
            warn!(order_id = %notice.client_order_id, "fill notice for unknown order");
            return Ok(());
        };

        // Long-only guard: a sell fill beyond the held quantity would
        // corrupt both tracker and ledger. Abort the order instead.
        if pending.order.side == OrderSide::Sell {
            let held = self.portfolio.position_quantity(&pending.order.symbol);
            if (notice.filled_qty as i64) > held {
                error!(
                    order_id = %notice.client_order_id,
                    filled = notice.filled_qty,
                    held,
                    "broker fill would open a short; aborting order"
                );
                let _ = pending.order.cancel();
                self.failures.record_failure(notice.timestamp);
                return Ok(());
            }
        }

        if let Err(err) = pending.order.fill(notice.filled_qty, notice.fill_price) {
            // Overfill or illegal transition from the broker stream:
            // abort this order, emit the event, keep the engine alive.
            error!(
                order_id = %notice.client_order_id,
                error = %err,
                "broker fill violated order state; aborting order"
            );
            if pending.order.is_working() {
                let _ = pending.order.cancel();
            }
            self.failures.record_failure(notice.timestamp);
            return Ok(());
        }

        let status = if pending.order.state == OrderState::Filled {
            FillStatus::Filled
        } else {
            FillStatus::PartiallyFilled
        };
        let report = FillReport {
            order_id: notice.client_order_id,
            symbol: pending.order.symbol.clone(),
            side: pending.order.side,
            status,
            filled_qty: notice.filled_qty,
            fill_price: notice.fill_price,
            slippage: 0.0,
            timestamp: notice.timestamp,
            reason: None,
        };

        if let Some(audit) = self.audit.as_mut() {
            audit.report(&pending.order, &report, notice.fill_price)?;
        }

        match self.tracker.process_fill(&report) {
            Ok(()) => {}
            Err(TrackerError::ShortOpen { .. }) => {
                error!(order_id = %notice.client_order_id, "fill rejected by tracker; aborting order");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
        self.portfolio.apply_fill(&report)?;
        self.tracker.check_invariant(&self.portfolio)?;
        self.metrics.orders_filled += 1;
        debug!(
            order_id = %notice.client_order_id,
            qty = notice.filled_qty,
            price = notice.fill_price,
            "fill applied"
        );

        if report.side == OrderSide::Buy {
            self.risk.on_opening_fill(
                &report.symbol,
                report.fill_price,
                report.timestamp,
                report.filled_qty,
                pending.signal_stop,
            );
        }
        self.risk.on_position_change(
            &report.symbol,
            self.portfolio.position_quantity(&report.symbol),
        );

        // Partially filled and not terminal: keep waiting for more fills.
        if !notice.terminal && pending.order.is_working() {
            self.pending.insert(notice.client_order_id, pending);
        }
        Ok(())
    }

    fn audit_event(
        &mut self,
        ts: NaiveDateTime,
        order: &Order,
        event: AuditEvent,
        price: f64,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        if let Some(audit) = self.audit.as_mut() {
            audit.record(
                ts,
                event,
                order.id.0,
                None,
                &order.symbol,
                order.side,
                order.quantity,
                order.filled_qty,
                price,
                None,
                reason,
            )?;
        }
        Ok(())
    }

    fn roll_session(&mut self, ts: NaiveDateTime) {
        let date = ts.date();
        if let Some(previous) = self.session_date {
            if date != previous {
                self.risk.roll_day(self.portfolio.total_value());
            }
        }
        self.session_date = Some(date);
    }

    fn maybe_snapshot(&mut self, ts: NaiveDateTime) -> Result<(), EngineError> {
        let due = match self.last_snapshot {
            None => true,
            Some(last) => {
                (ts - last).num_seconds() >= self.config.health_snapshot_interval_secs as i64
            }
        };
        if due {
            self.write_snapshot(ts)?;
            self.last_snapshot = Some(ts);
        }
        Ok(())
    }

    fn write_snapshot(&mut self, ts: NaiveDateTime) -> Result<(), EngineError> {
        let Some(path) = self.config.health_snapshot_path.clone() else {
            return Ok(());
        };
        let snapshot = HealthSnapshot::capture(
            self.status,
            ts,
            self.started.elapsed().as_secs(),
            &self.portfolio,
            self.config.initial_capital,
            self.metrics.ticks,
            self.metrics.orders_filled,
        );
        snapshot.write(&path)?;
        Ok(())
    }

    fn maybe_log_status(&mut self, ts: NaiveDateTime) {
        let due = match self.last_status {
            None => true,
            Some(last) => {
                (ts - last).num_seconds() >= self.config.status_log_interval_secs as i64
            }
        };
        if due {
            self.metrics.log_status(
                self.portfolio.total_value(),
                self.config.initial_capital,
                self.portfolio.positions.len(),
            );
            self.last_status = Some(ts);
        }
    }

    /// Deterministic teardown: cancel every working order at the broker,
    /// then persist the final health snapshot.
    fn teardown(&mut self) {
        self.status = match self.status {
            HealthStatus::Degraded => HealthStatus::Degraded,
            _ => HealthStatus::Stopped,
        };
        let pending: Vec<OrderId> = self.pending.keys().copied().collect();
        for id in pending {
            let Some(mut entry) = self.pending.remove(&id) else { continue };
            if let Err(err) = self.broker.cancel(&entry.exchange_id) {
                warn!(order_id = %id, error = %err, "cancel on shutdown failed");
            }
            if entry.order.is_working() {
                let _ = entry.order.cancel();
            }
        }
        let ts = self.last_snapshot.or(self.session_date.map(|d| d.and_hms_opt(0, 0, 0).unwrap()));
        if let Err(err) = self.write_snapshot(ts.unwrap_or_default()) {
            warn!(error = %err, "final health snapshot failed");
        }
        info!(
            final_value = self.portfolio.total_value(),
            trades = self.tracker.trade_count(),
            "live engine stopped"
        );
    }
}

/// Caller-side handle: the mailbox sender plus the actor's join handle.
pub struct LiveHandle {
    tx: Sender<EngineEvent>,
    join: JoinHandle<Result<LiveSummary, EngineError>>,
}

impl LiveHandle {
    pub fn sender(&self) -> Sender<EngineEvent> {
        self.tx.clone()
    }

    pub fn tick(&self, symbol: &str, price: f64, timestamp: NaiveDateTime) {
        let _ = self.tx.send(EngineEvent::Tick {
            symbol: symbol.to_string(),
            price,
            timestamp,
        });
    }

    /// Request shutdown and wait for the final summary.
    pub fn shutdown(self) -> Result<LiveSummary, EngineError> {
        let _ = self.tx.send(EngineEvent::Shutdown);
        self.join.join().expect("live engine thread panicked")
    }
}
