//! Fill bookkeeping: FIFO round-trip matching and the equity time series.

pub mod equity;
pub mod trade_tracker;

pub use equity::EquityTracker;
pub use trade_tracker::{OpenLot, TradeTracker, TrackerError};
