//! Engine counters and the periodic status line.

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub ticks: u64,
    pub signals_generated: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub stops_triggered: u64,
}

impl EngineMetrics {
    pub fn log_status(&self, equity: f64, initial_capital: f64, open_positions: usize) {
        let pnl = equity - initial_capital;
        let pnl_pct = if initial_capital > 0.0 { pnl / initial_capital * 100.0 } else { 0.0 };
        info!(
            ticks = self.ticks,
            signals = self.signals_generated,
            orders_filled = self.orders_filled,
            orders_submitted = self.orders_submitted,
            orders_rejected = self.orders_rejected,
            stops = self.stops_triggered,
            open_positions,
            equity,
            pnl,
            pnl_pct,
            "engine status"
        );
    }
}
