//! Event loops composing the simulation core.

pub mod backtest;
pub mod health;
pub mod live;
pub mod metrics;

pub use backtest::{BacktestEngine, BacktestResult};
pub use health::{FailureTracker, HealthSnapshot, HealthStatus};
pub use live::{EngineEvent, LiveEngine, LiveHandle, LiveSummary};
pub use metrics::EngineMetrics;

use crate::domain::order::OrderError;
use crate::domain::portfolio::LedgerError;
use crate::tracker::trade_tracker::TrackerError;
use thiserror::Error;

/// Fatal engine failures. Validation and matching rejections are not
/// errors — they are recorded and the loop continues; everything here
/// stops a backtest run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("audit log io: {0}")]
    Audit(#[from] std::io::Error),
}
