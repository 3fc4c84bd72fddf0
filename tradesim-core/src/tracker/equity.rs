//! Equity tracker: total portfolio value sampled once per tick.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Time series of (timestamp, total portfolio value), recorded after
/// mark-to-market on each tick. Timestamps are non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityTracker {
    history: Vec<(NaiveDateTime, f64)>,
}

impl EquityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, timestamp: NaiveDateTime, value: f64) {
        debug_assert!(
            self.history.last().map_or(true, |&(last, _)| timestamp >= last),
            "equity timestamps must be non-decreasing"
        );
        self.history.push((timestamp, value));
    }

    pub fn series(&self) -> &[(NaiveDateTime, f64)] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn initial_value(&self) -> Option<f64> {
        self.history.first().map(|&(_, v)| v)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.history.last().map(|&(_, v)| v)
    }

    /// Total return as a fraction of the initial value.
    pub fn total_return(&self) -> f64 {
        match (self.initial_value(), self.last_value()) {
            (Some(initial), Some(last)) if initial != 0.0 => (last - initial) / initial,
            _ => 0.0,
        }
    }

    pub fn into_series(self) -> Vec<(NaiveDateTime, f64)> {
        self.history
    }
}
