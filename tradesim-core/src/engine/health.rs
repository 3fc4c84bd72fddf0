//! Health snapshot and failure escalation.

use crate::domain::portfolio::Portfolio;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;

/// Engine health status. `"healthy"` is accepted as a legacy alias of
/// `running` when deserializing old snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Initializing,
    #[serde(alias = "healthy")]
    Running,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionHealth {
    pub quantity: i64,
    pub avg_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

/// Periodic engine health report, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: NaiveDateTime,
    pub uptime_secs: u64,
    pub equity: f64,
    pub pnl: f64,
    pub positions: BTreeMap<String, PositionHealth>,
    pub ticks: u64,
    pub orders_filled: u64,
}

impl HealthSnapshot {
    pub fn capture(
        status: HealthStatus,
        timestamp: NaiveDateTime,
        uptime_secs: u64,
        portfolio: &Portfolio,
        initial_capital: f64,
        ticks: u64,
        orders_filled: u64,
    ) -> Self {
        let positions = portfolio
            .positions
            .iter()
            .map(|(symbol, position)| {
                (
                    symbol.clone(),
                    PositionHealth {
                        quantity: position.quantity,
                        avg_price: position.avg_price,
                        mark_price: position.mark_price,
                        unrealized_pnl: position.unrealized_pnl(),
                    },
                )
            })
            .collect();
        let equity = portfolio.total_value();
        Self {
            status,
            timestamp,
            uptime_secs,
            equity,
            pnl: equity - initial_capital,
            positions,
            ticks,
            orders_filled,
        }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

const FAILURE_WINDOW_SECS: i64 = 600;
const CRITICAL_FAILURES: usize = 3;

/// Sliding-window failure counter: 3 failures inside 10 minutes is
/// critical and should page someone.
#[derive(Debug, Default)]
pub struct FailureTracker {
    failures: VecDeque<NaiveDateTime>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure at `now`; returns the count within the window.
    pub fn record_failure(&mut self, now: NaiveDateTime) -> usize {
        let cutoff = now - Duration::seconds(FAILURE_WINDOW_SECS);
        while self.failures.front().is_some_and(|&t| t < cutoff) {
            self.failures.pop_front();
        }
        self.failures.push_back(now);
        self.failures.len()
    }

    pub fn is_critical(&self, count: usize) -> bool {
        count >= CRITICAL_FAILURES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.json");

        let portfolio = Portfolio::new(100_000.0);
        let snapshot = HealthSnapshot::capture(
            HealthStatus::Running,
            ts(),
            120,
            &portfolio,
            100_000.0,
            500,
            12,
        );
        snapshot.write(&path).unwrap();

        let loaded = HealthSnapshot::read(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.pnl, 0.0);
    }

    #[test]
    fn legacy_healthy_maps_to_running() {
        let status: HealthStatus = serde_json::from_str("\"healthy\"").unwrap();
        assert_eq!(status, HealthStatus::Running);
    }

    #[test]
    fn failure_window_escalates_at_three() {
        let mut tracker = FailureTracker::new();
        assert_eq!(tracker.record_failure(ts()), 1);
        assert_eq!(tracker.record_failure(ts() + Duration::minutes(2)), 2);
        let count = tracker.record_failure(ts() + Duration::minutes(4));
        assert_eq!(count, 3);
        assert!(tracker.is_critical(count));
    }

    #[test]
    fn old_failures_fall_out_of_window() {
        let mut tracker = FailureTracker::new();
        tracker.record_failure(ts());
        tracker.record_failure(ts() + Duration::minutes(1));
        // 11 minutes later both prior failures have expired.
        let count = tracker.record_failure(ts() + Duration::minutes(11));
        assert_eq!(count, 2);
        assert!(!tracker.is_critical(count));
    }
}
