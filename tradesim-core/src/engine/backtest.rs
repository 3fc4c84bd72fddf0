//! Bar-by-bar backtest event loop.
//!
//! Per tick, in order: update bar context and fill working orders, mark to
//! market, evaluate stops, gather strategy signals (unless the circuit
//! breaker is tripped), then execute exits before entries through
//! size -> validate -> create -> acknowledge -> match, applying each fill
//! report through the trade tracker and then the ledger. Equity is
//! recorded last. Single-threaded and wall-clock free: two runs over the
//! same inputs produce byte-identical results.

use crate::config::EngineConfig;
use crate::domain::bar::Bar;
use crate::domain::fill::{FillReport, FillStatus};
use crate::domain::ids::IdGen;
use crate::domain::order::{Order, OrderSide, OrderType, TimeInForce};
use crate::domain::portfolio::Portfolio;
use crate::domain::signal::{Signal, SignalAction};
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::trade::CompletedTrade;
use crate::engine::metrics::EngineMetrics;
use crate::engine::EngineError;
use crate::execution::matching::MatchingEngine;
use crate::orders::audit::OrderAuditLog;
use crate::orders::validator::OrderValidator;
use crate::risk::manager::{ExitSignal, RiskManager};
use crate::sizers::Sizer;
use crate::strategy::Strategy;
use crate::tracker::equity::EquityTracker;
use crate::tracker::trade_tracker::TradeTracker;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Results bundle from a completed backtest.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub final_value: f64,
    /// Total return in percent of initial capital.
    pub total_return_pct: f64,
    pub bar_count: usize,
    pub trades: Vec<CompletedTrade>,
    pub equity_curve: Vec<(NaiveDateTime, f64)>,
    pub reports: Vec<FillReport>,
    pub metrics: EngineMetrics,
}

/// Deterministic backtest engine over chronologically-ordered bar streams.
pub struct BacktestEngine {
    config: EngineConfig,
    matching: MatchingEngine,
    validator: OrderValidator,
    risk: RiskManager,
    sizer: Box<dyn Sizer>,
    portfolio: Portfolio,
    tracker: TradeTracker,
    equity: EquityTracker,
    id_gen: IdGen,
    metrics: EngineMetrics,
    /// At most one working (GTC/DAY) order per symbol.
    working: BTreeMap<String, Order>,
    current_prices: HashMap<String, f64>,
    /// Last non-HOLD strategy emission per symbol, for duplicate filtering.
    last_emitted: BTreeMap<String, SignalAction>,
    session_date: Option<NaiveDate>,
    reports: Vec<FillReport>,
    audit: Option<OrderAuditLog>,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig, sizer: Box<dyn Sizer>) -> Result<Self, EngineError> {
        let audit = match (&config.order_log_path, config.log_orders) {
            (Some(path), true) => Some(OrderAuditLog::open(path)?),
            _ => None,
        };
        Ok(Self {
            matching: MatchingEngine::new(config.matching.clone()),
            validator: OrderValidator::new(config.risk.clone()),
            risk: RiskManager::new(config.stops.clone(), config.initial_capital),
            sizer,
            portfolio: Portfolio::new(config.initial_capital),
            tracker: TradeTracker::new(),
            equity: EquityTracker::new(),
            id_gen: IdGen::default(),
            metrics: EngineMetrics::default(),
            working: BTreeMap::new(),
            current_prices: HashMap::new(),
            last_emitted: BTreeMap::new(),
            session_date: None,
            reports: Vec::new(),
            audit,
            config,
        })
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics
    }

    /// Run a single-symbol backtest over an ordered bar stream.
    pub fn run(
        &mut self,
        strategy: &mut dyn Strategy,
        bars: Vec<Bar>,
    ) -> Result<BacktestResult, EngineError> {
        let symbols = bars
            .first()
            .map(|bar| vec![bar.symbol.clone()])
            .unwrap_or_default();
        info!(symbols = ?symbols, bars = bars.len(), "starting backtest");

        let mut last_ts = None;
        let mut bar_count = 0usize;
        for bar in bars {
            last_ts = Some(bar.timestamp);
            bar_count += 1;
            self.process_tick(bar.timestamp, std::slice::from_ref(&bar), strategy)?;
        }

        if let Some(ts) = last_ts {
            self.finish(ts)?;
        }
        Ok(self.build_result(symbols, bar_count))
    }

    /// Run a multi-symbol backtest. Bars are merged by timestamp; bars
    /// sharing a timestamp are dispatched within the same tick, in symbol
    /// order. No clock alignment across symbols is assumed.
    pub fn run_multi(
        &mut self,
        strategy: &mut dyn Strategy,
        bars_by_symbol: BTreeMap<String, Vec<Bar>>,
    ) -> Result<BacktestResult, EngineError> {
        let symbols: Vec<String> = bars_by_symbol.keys().cloned().collect();
        info!(symbols = ?symbols, "starting multi-symbol backtest");

        // Merge: timestamp -> bars present at that instant, symbol-ordered.
        let mut merged: BTreeMap<NaiveDateTime, Vec<Bar>> = BTreeMap::new();
        for bars in bars_by_symbol.into_values() {
            for bar in bars {
                merged.entry(bar.timestamp).or_default().push(bar);
            }
        }
        for bars in merged.values_mut() {
            bars.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        }

        let mut last_ts = None;
        let mut bar_count = 0usize;
        for (ts, bars) in merged {
            last_ts = Some(ts);
            bar_count += 1;
            self.process_tick(ts, &bars, strategy)?;
        }

        if let Some(ts) = last_ts {
            self.finish(ts)?;
        }
        Ok(self.build_result(symbols, bar_count))
    }

    /// Manually reset the circuit breaker between runs.
    pub fn reset_circuit_breaker(&mut self) {
        self.risk.reset_breaker();
    }

    fn process_tick(
        &mut self,
        ts: NaiveDateTime,
        bars: &[Bar],
        strategy: &mut dyn Strategy,
    ) -> Result<(), EngineError> {
        self.roll_session(ts)?;

        // Phase 1-2: bar context updates, then fills against working orders.
        for bar in bars {
            self.matching.set_bar(bar.clone());
            let reference = self.matching.reference_price(bar);
            self.current_prices.insert(bar.symbol.clone(), reference);
            self.fill_working(&bar.symbol)?;
        }

        // Seed the equity curve with starting capital on the first tick.
        if self.equity.is_empty() {
            self.equity.record(ts, self.portfolio.total_value());
        }

        // Phase 3: mark to market at reference prices.
        self.portfolio.mark_to_market(&self.current_prices);

        // Phase 4: stops before strategy, so a same-tick entry can never
        // override an imminent exit.
        let equity_now = self.portfolio.total_value();
        let exits =
            self.risk
                .check_stops(&self.current_prices, equity_now, &self.portfolio, ts);

        // Phase 5: strategy signals, gated by the circuit breaker and
        // filtered for HOLD and immediate duplicates.
        let mut entries: Vec<Signal> = Vec::new();
        if !self.risk.breaker_tripped() {
            let snapshot = MarketSnapshot {
                timestamp: ts,
                prices: self.current_prices.clone(),
                bars: bars.iter().map(|b| (b.symbol.clone(), b.clone())).collect(),
            };
            for signal in strategy.generate_signals(&snapshot) {
                if signal.action == SignalAction::Hold {
                    continue;
                }
                if !self.current_prices.contains_key(&signal.symbol) {
                    debug!(symbol = %signal.symbol, "signal for symbol with no market data");
                    continue;
                }
                if self.last_emitted.get(&signal.symbol) == Some(&signal.action) {
                    continue;
                }
                self.last_emitted
                    .insert(signal.symbol.clone(), signal.action);
                self.metrics.signals_generated += 1;
                entries.push(signal);
            }
        }

        // Phase 6: exits first, then entries.
        for exit in exits {
            self.metrics.stops_triggered += 1;
            self.execute_exit(ts, &exit)?;
        }
        for signal in entries {
            self.execute_signal(ts, &signal)?;
        }

        // Phase 7: record equity.
        self.equity.record(ts, self.portfolio.total_value());
        self.metrics.ticks += 1;
        Ok(())
    }

    /// Cancel working DAY orders and roll the breaker's daily reference
    /// when the calendar date changes.
    fn roll_session(&mut self, ts: NaiveDateTime) -> Result<(), EngineError> {
        let date = ts.date();
        if let Some(previous) = self.session_date {
            if date != previous {
                let expiring: Vec<String> = self
                    .working
                    .iter()
                    .filter(|(_, order)| order.time_in_force == TimeInForce::Day)
                    .map(|(symbol, _)| symbol.clone())
                    .collect();
                for symbol in expiring {
                    let mut order = self.working.remove(&symbol).expect("key just listed");
                    order.cancel()?;
                    debug!(order_id = %order.id, %symbol, "day order expired at session boundary");
                    self.audit_cancel(ts, &order)?;
                }
                self.risk.roll_day(self.portfolio.total_value());
            }
        }
        self.session_date = Some(date);
        Ok(())
    }

    /// Attempt to fill the symbol's working order against the fresh bar.
    fn fill_working(&mut self, symbol: &str) -> Result<(), EngineError> {
        let Some(mut order) = self.working.remove(symbol) else {
            return Ok(());
        };
        let reference = self.current_prices.get(symbol).copied().unwrap_or(0.0);
        let report = self.matching.match_order(&mut order)?;
        self.apply_report(&order, report, reference, None)?;
        if order.is_working() {
            self.working.insert(symbol.to_string(), order);
        }
        Ok(())
    }

    fn execute_exit(&mut self, ts: NaiveDateTime, exit: &ExitSignal) -> Result<(), EngineError> {
        let held = self.portfolio.position_quantity(&exit.symbol);
        if held <= 0 {
            return Ok(());
        }
        let qty = exit.quantity.min(held as u64);
        let reference = self
            .current_prices
            .get(&exit.symbol)
            .copied()
            .unwrap_or(exit.trigger_price);
        warn!(
            symbol = %exit.symbol,
            qty,
            reason = exit.reason.as_str(),
            trigger = exit.trigger_price,
            "executing stop exit"
        );
        // Forced exits are immediate-or-cancel; an unfilled remainder is
        // retried when the stop re-fires on a later tick.
        self.submit_order(
            ts,
            &exit.symbol,
            OrderSide::Sell,
            qty,
            OrderType::Market,
            TimeInForce::Ioc,
            reference,
            None,
        )
    }

    fn execute_signal(&mut self, ts: NaiveDateTime, signal: &Signal) -> Result<(), EngineError> {
        let side = match signal.action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            SignalAction::Hold => return Ok(()),
        };
        let reference = self
            .current_prices
            .get(&signal.symbol)
            .copied()
            .unwrap_or(signal.price);

        // A working order on the same symbol: same direction lets it keep
        // filling; opposite direction cancels it and proceeds.
        if let Some(working) = self.working.get(&signal.symbol) {
            if working.side == side {
                debug!(symbol = %signal.symbol, "working order in same direction; skipping signal");
                return Ok(());
            }
            let mut order = self.working.remove(&signal.symbol).expect("key just checked");
            order.cancel()?;
            debug!(order_id = %order.id, "canceled working order on opposing signal");
            self.audit_cancel(ts, &order)?;
        }

        let sized = self.sizer.quantity(signal, &self.portfolio, reference);
        let qty = match side {
            OrderSide::Buy => sized,
            OrderSide::Sell => {
                // Long-only: sells close, never open shorts.
                let held = self.portfolio.position_quantity(&signal.symbol);
                if held <= 0 {
                    return Ok(());
                }
                sized.min(held as u64)
            }
        };
        if qty == 0 {
            return Ok(());
        }

        self.submit_order(
            ts,
            &signal.symbol,
            side,
            qty,
            OrderType::Market,
            self.config.default_tif(),
            reference,
            signal.stop_loss,
        )
    }

    /// Validate, create, acknowledge, and match one order, then apply the
    /// resulting report. Rejections are recorded and the loop continues.
    #[allow(clippy::too_many_arguments)]
    fn submit_order(
        &mut self,
        ts: NaiveDateTime,
        symbol: &str,
        side: OrderSide,
        qty: u64,
        order_type: OrderType,
        tif: TimeInForce,
        reference_price: f64,
        signal_stop: Option<f64>,
    ) -> Result<(), EngineError> {
        let id = self.id_gen.next_order_id();
        let mut order = Order::new(id, symbol, side, order_type, qty, tif, ts);

        if let Err(rejection) = self.validator.validate(
            ts,
            symbol,
            side,
            qty,
            reference_price,
            &self.portfolio,
            &self.current_prices,
        ) {
            order.reject()?;
            self.metrics.orders_rejected += 1;
            if let Some(audit) = self.audit.as_mut() {
                audit.record(
                    ts,
                    crate::orders::audit::AuditEvent::Rejected,
                    order.id.0,
                    None,
                    symbol,
                    side,
                    qty,
                    0,
                    reference_price,
                    None,
                    Some(rejection.code.as_str()),
                )?;
            }
            return Ok(());
        }

        if let Some(audit) = self.audit.as_mut() {
            audit.order_sent(ts, &order, reference_price)?;
        }
        order.acknowledge()?;
        if let Some(audit) = self.audit.as_mut() {
            audit.record(
                ts,
                crate::orders::audit::AuditEvent::Acked,
                order.id.0,
                None,
                symbol,
                side,
                qty,
                0,
                reference_price,
                None,
                None,
            )?;
        }
        self.validator.record_order(ts, symbol);
        self.metrics.orders_submitted += 1;

        let report = self.matching.match_order(&mut order)?;
        self.apply_report(&order, report, reference_price, signal_stop)?;

        if order.is_working()
            && matches!(order.time_in_force, TimeInForce::Gtc | TimeInForce::Day)
        {
            self.working.insert(symbol.to_string(), order);
        }
        Ok(())
    }

    /// Fold a fill report through the trade tracker, then the ledger, then
    /// the risk manager, and verify the tracker/ledger invariant.
    fn apply_report(
        &mut self,
        order: &Order,
        report: FillReport,
        reference_price: f64,
        signal_stop: Option<f64>,
    ) -> Result<(), EngineError> {
        if let Some(audit) = self.audit.as_mut() {
            audit.report(order, &report, reference_price)?;
        }

        if report.is_fill() {
            self.tracker.process_fill(&report)?;
            self.portfolio.apply_fill(&report)?;
            self.tracker.check_invariant(&self.portfolio)?;
            self.metrics.orders_filled += 1;

            if report.side == OrderSide::Buy {
                self.risk.on_opening_fill(
                    &report.symbol,
                    report.fill_price,
                    report.timestamp,
                    report.filled_qty,
                    signal_stop,
                );
            }
            self.risk.on_position_change(
                &report.symbol,
                self.portfolio.position_quantity(&report.symbol),
            );
        }
        self.reports.push(report);
        Ok(())
    }

    /// End of stream: cancel working orders, then force-close every open
    /// position at its final reference price via a synthetic market exit.
    fn finish(&mut self, ts: NaiveDateTime) -> Result<(), EngineError> {
        let leftover: Vec<String> = self.working.keys().cloned().collect();
        for symbol in leftover {
            let mut order = self.working.remove(&symbol).expect("key just listed");
            order.cancel()?;
            self.audit_cancel(ts, &order)?;
        }

        let open: Vec<String> = self.portfolio.positions.keys().cloned().collect();
        for symbol in open {
            let qty = self.portfolio.position_quantity(&symbol);
            if qty <= 0 {
                continue;
            }
            let Some(&price) = self.current_prices.get(&symbol) else {
                warn!(%symbol, "no price to close position at end of stream");
                continue;
            };
            info!(%symbol, qty, price, "force-closing position at end of backtest");

            let report = FillReport {
                order_id: self.id_gen.next_order_id(),
                symbol: symbol.clone(),
                side: OrderSide::Sell,
                status: FillStatus::Filled,
                filled_qty: qty as u64,
                fill_price: price,
                slippage: 0.0,
                timestamp: ts,
                reason: None,
            };
            self.tracker.process_fill(&report)?;
            self.portfolio.apply_fill(&report)?;
            self.tracker.check_invariant(&self.portfolio)?;
            self.risk.on_position_change(&symbol, 0);
            self.reports.push(report);
        }
        Ok(())
    }

    fn build_result(&self, symbols: Vec<String>, bar_count: usize) -> BacktestResult {
        let final_value = self.portfolio.total_value();
        let initial = self.config.initial_capital;
        let total_return_pct = if initial > 0.0 {
            (final_value - initial) / initial * 100.0
        } else {
            0.0
        };
        info!(
            final_value,
            total_return_pct,
            trades = self.tracker.trade_count(),
            "backtest complete"
        );
        BacktestResult {
            symbols,
            initial_capital: initial,
            final_value,
            total_return_pct,
            bar_count,
            trades: self.tracker.trades().to_vec(),
            equity_curve: self.equity.series().to_vec(),
            reports: self.reports.clone(),
            metrics: self.metrics,
        }
    }

    fn audit_cancel(&mut self, ts: NaiveDateTime, order: &Order) -> Result<(), EngineError> {
        if let Some(audit) = self.audit.as_mut() {
            audit.record(
                ts,
                crate::orders::audit::AuditEvent::Canceled,
                order.id.0,
                None,
                &order.symbol,
                order.side,
                order.quantity,
                order.filled_qty,
                0.0,
                None,
                None,
            )?;
        }
        Ok(())
    }
}
