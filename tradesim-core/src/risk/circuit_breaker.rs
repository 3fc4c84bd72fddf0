//! Portfolio-level circuit breaker.
//!
//! Trips when equity draws down past `max_drawdown_pct` from its high-water
//! mark, or when today's loss exceeds `portfolio_stop_pct`. Once tripped it
//! stays tripped until an explicit reset; reset clears the tripped state
//! but never the high-water mark.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerReason {
    MaxDrawdown,
    DailyLoss,
}

impl BreakerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerReason::MaxDrawdown => "max_drawdown",
            BreakerReason::DailyLoss => "daily_loss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    enabled: bool,
    max_drawdown_pct: f64,
    portfolio_stop_pct: f64,
    high_water_mark: f64,
    day_start_equity: f64,
    tripped: Option<(BreakerReason, NaiveDateTime)>,
}

impl CircuitBreaker {
    pub fn new(
        enabled: bool,
        max_drawdown_pct: f64,
        portfolio_stop_pct: f64,
        initial_equity: f64,
    ) -> Self {
        Self {
            enabled,
            max_drawdown_pct,
            portfolio_stop_pct,
            high_water_mark: initial_equity,
            day_start_equity: initial_equity,
            tripped: None,
        }
    }

    /// Feed the latest equity. Updates the HWM first, then evaluates both
    /// trip conditions. Returns the tripped state after this observation.
    pub fn observe(&mut self, equity: f64, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        if self.tripped.is_some() {
            return true;
        }

        if equity > self.high_water_mark {
            self.high_water_mark = equity;
        }

        if self.high_water_mark > 0.0
            && equity / self.high_water_mark < 1.0 - self.max_drawdown_pct
        {
            let drawdown = 1.0 - equity / self.high_water_mark;
            warn!(drawdown, hwm = self.high_water_mark, equity, "circuit breaker: max drawdown");
            self.tripped = Some((BreakerReason::MaxDrawdown, now));
            return true;
        }

        if self.day_start_equity > 0.0 {
            let day_return = (equity - self.day_start_equity) / self.day_start_equity;
            if day_return < -self.portfolio_stop_pct {
                warn!(day_return, equity, "circuit breaker: daily loss");
                self.tripped = Some((BreakerReason::DailyLoss, now));
                return true;
            }
        }

        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.is_some()
    }

    pub fn trip_reason(&self) -> Option<BreakerReason> {
        self.tripped.map(|(reason, _)| reason)
    }

    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    /// Clear the tripped state. The high-water mark survives a reset.
    pub fn reset(&mut self) {
        warn!("circuit breaker reset");
        self.tripped = None;
    }

    /// Start a new trading day: today's reference equity becomes `equity`.
    pub fn roll_day(&mut self, equity: f64) {
        self.day_start_equity = equity;
    }
}
