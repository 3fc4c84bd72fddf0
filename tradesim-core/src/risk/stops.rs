//! Per-position stop state.
//!
//! A stop is created on the first opening fill of a symbol and destroyed
//! when the position closes. The trailing high-water mark only ever moves
//! up for a long position; it is never recomputed from history.

use crate::risk::manager::ExitReason;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Stop-loss state for one long position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStop {
    pub symbol: String,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub quantity: u64,
    /// Highest price observed since entry; drives the trailing trigger.
    pub high_water_mark: f64,
    /// Fixed percent stop trigger: entry * (1 - position_stop_pct).
    pub fixed_trigger: Option<f64>,
    /// Trailing percent stop trigger: hwm * (1 - trailing_stop_pct).
    pub trailing_trigger: Option<f64>,
    /// Absolute price level, typically from the entry signal's stop_loss.
    pub absolute_trigger: Option<f64>,
}

impl PositionStop {
    pub fn new_long(
        symbol: impl Into<String>,
        entry_price: f64,
        entry_time: NaiveDateTime,
        quantity: u64,
        position_stop_pct: Option<f64>,
        trailing_stop_pct: Option<f64>,
        absolute_level: Option<f64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            entry_price,
            entry_time,
            quantity,
            high_water_mark: entry_price,
            fixed_trigger: position_stop_pct.map(|pct| entry_price * (1.0 - pct)),
            trailing_trigger: trailing_stop_pct.map(|pct| entry_price * (1.0 - pct)),
            absolute_trigger: absolute_level,
        }
    }

    /// Fold a new price observation into the trailing state. The HWM and
    /// the trailing trigger are monotone non-decreasing.
    pub fn observe_price(&mut self, price: f64, trailing_stop_pct: f64) {
        if self.trailing_trigger.is_some() && price > self.high_water_mark {
            self.high_water_mark = price;
            let candidate = self.high_water_mark * (1.0 - trailing_stop_pct);
            if candidate > self.trailing_trigger.unwrap_or(f64::NEG_INFINITY) {
                self.trailing_trigger = Some(candidate);
            }
        } else if price > self.high_water_mark {
            self.high_water_mark = price;
        }
    }

    /// First stop breached by `price`, if any. Checking order: fixed,
    /// trailing, absolute — at most one reason per evaluation.
    pub fn triggered(&self, price: f64) -> Option<ExitReason> {
        if let Some(trigger) = self.fixed_trigger {
            if price <= trigger {
                return Some(ExitReason::PositionStop);
            }
        }
        if let Some(trigger) = self.trailing_trigger {
            if price <= trigger {
                return Some(ExitReason::TrailingStop);
            }
        }
        if let Some(trigger) = self.absolute_trigger {
            if price <= trigger {
                return Some(ExitReason::AbsoluteStop);
            }
        }
        None
    }

    /// Trigger price matching the given exit reason, for reporting.
    pub fn trigger_for(&self, reason: ExitReason) -> f64 {
        match reason {
            ExitReason::PositionStop => self.fixed_trigger.unwrap_or(0.0),
            ExitReason::TrailingStop => self.trailing_trigger.unwrap_or(0.0),
            ExitReason::AbsoluteStop => self.absolute_trigger.unwrap_or(0.0),
            ExitReason::CircuitBreaker => 0.0,
        }
    }
}
