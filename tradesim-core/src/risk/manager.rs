//! Risk manager: owns per-symbol stops and the portfolio circuit breaker,
//! and emits exit signals when either fires.
//!
//! The engine evaluates stops before strategy signals on every tick, so an
//! imminent exit can never be overridden by a same-tick entry.

use crate::config::StopConfig;
use crate::domain::order::OrderSide;
use crate::domain::portfolio::Portfolio;
use crate::risk::circuit_breaker::CircuitBreaker;
use crate::risk::stops::PositionStop;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Why a position is being force-exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    PositionStop,
    TrailingStop,
    AbsoluteStop,
    CircuitBreaker,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::PositionStop => "position_stop",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::AbsoluteStop => "absolute",
            ExitReason::CircuitBreaker => "circuit_breaker",
        }
    }
}

/// Forced exit of one position at market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub symbol: String,
    pub side: OrderSide,
    /// Full position quantity at trigger time.
    pub quantity: u64,
    pub reason: ExitReason,
    /// Price that breached the stop.
    pub trigger_price: f64,
    /// The stop level that was breached.
    pub stop_price: f64,
}

/// Stop and circuit-breaker supervision over an open portfolio.
#[derive(Debug)]
pub struct RiskManager {
    config: StopConfig,
    stops: BTreeMap<String, PositionStop>,
    breaker: CircuitBreaker,
}

impl RiskManager {
    pub fn new(config: StopConfig, initial_equity: f64) -> Self {
        let breaker = CircuitBreaker::new(
            config.enable_circuit_breaker,
            config.max_drawdown_pct,
            config.portfolio_stop_pct,
            initial_equity,
        );
        Self { config, stops: BTreeMap::new(), breaker }
    }

    /// Register an opening fill. The stop is created on the first opening
    /// fill of a symbol; later adds only grow the tracked quantity — entry
    /// price and high-water mark are not restated.
    pub fn on_opening_fill(
        &mut self,
        symbol: &str,
        entry_price: f64,
        entry_time: NaiveDateTime,
        quantity: u64,
        signal_stop: Option<f64>,
    ) {
        match self.stops.get_mut(symbol) {
            Some(stop) => stop.quantity += quantity,
            None => {
                let fixed = (self.config.position_stop_pct > 0.0)
                    .then_some(self.config.position_stop_pct);
                let trailing = self
                    .config
                    .use_trailing_stops
                    .then_some(self.config.trailing_stop_pct);
                let stop = PositionStop::new_long(
                    symbol,
                    entry_price,
                    entry_time,
                    quantity,
                    fixed,
                    trailing,
                    signal_stop,
                );
                info!(
                    symbol,
                    entry_price,
                    fixed = ?stop.fixed_trigger,
                    trailing = ?stop.trailing_trigger,
                    "position stop armed"
                );
                self.stops.insert(symbol.to_string(), stop);
            }
        }
    }

    /// Reconcile stop state with the ledger after any position change.
    /// A closed position destroys its stop.
    pub fn on_position_change(&mut self, symbol: &str, quantity: i64) {
        if quantity <= 0 {
            self.stops.remove(symbol);
        } else if let Some(stop) = self.stops.get_mut(symbol) {
            stop.quantity = quantity as u64;
        }
    }

    /// Evaluate the circuit breaker and every position stop against the
    /// latest marks. At most one exit signal per position per tick.
    ///
    /// A breaker trip does not force-close positions — it suppresses new
    /// entries (the engine consults [`RiskManager::breaker_tripped`]) while
    /// stops keep protecting what is already open.
    pub fn check_stops(
        &mut self,
        current_prices: &HashMap<String, f64>,
        equity: f64,
        portfolio: &Portfolio,
        now: NaiveDateTime,
    ) -> Vec<ExitSignal> {
        self.breaker.observe(equity, now);

        let mut exits = Vec::new();
        let mut fired: Vec<String> = Vec::new();

        for (symbol, stop) in self.stops.iter_mut() {
            let Some(&price) = current_prices.get(symbol) else {
                continue;
            };
            let held = portfolio.position_quantity(symbol);
            if held <= 0 {
                continue;
            }

            stop.observe_price(price, self.config.trailing_stop_pct);

            if let Some(reason) = stop.triggered(price) {
                let stop_price = stop.trigger_for(reason);
                warn!(
                    symbol,
                    price,
                    stop_price,
                    reason = reason.as_str(),
                    "stop triggered"
                );
                exits.push(ExitSignal {
                    symbol: symbol.clone(),
                    side: OrderSide::Sell,
                    quantity: held as u64,
                    reason,
                    trigger_price: price,
                    stop_price,
                });
                fired.push(symbol.clone());
            }
        }

        // A fired stop is disarmed; it re-arms only via a new opening fill.
        for symbol in fired {
            self.stops.remove(&symbol);
        }
        exits
    }

    /// Force-exit signals for every open position, tagged circuit_breaker.
    /// Used by the live engine's shutdown path.
    pub fn breaker_exits(
        &mut self,
        portfolio: &Portfolio,
        current_prices: &HashMap<String, f64>,
    ) -> Vec<ExitSignal> {
        let mut exits = Vec::new();
        for (symbol, position) in portfolio.positions.iter() {
            if position.quantity <= 0 {
                continue;
            }
            let price = current_prices
                .get(symbol)
                .copied()
                .unwrap_or(position.mark_price);
            exits.push(ExitSignal {
                symbol: symbol.clone(),
                side: OrderSide::Sell,
                quantity: position.quantity as u64,
                reason: ExitReason::CircuitBreaker,
                trigger_price: price,
                stop_price: 0.0,
            });
            self.stops.remove(symbol);
        }
        exits
    }

    pub fn breaker_tripped(&self) -> bool {
        self.breaker.is_tripped()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn reset_breaker(&mut self) {
        self.breaker.reset();
    }

    pub fn roll_day(&mut self, equity: f64) {
        self.breaker.roll_day(equity);
    }

    pub fn stop(&self, symbol: &str) -> Option<&PositionStop> {
        self.stops.get(symbol)
    }

    pub fn active_stop_count(&self) -> usize {
        self.stops.len()
    }
}
