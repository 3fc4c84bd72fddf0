use crate::domain::ids::OrderId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One completed round trip: an opening fill matched FIFO against a closing
/// fill. Append-only output of the trade tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub symbol: String,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u64,
    /// quantity x (exit - entry).
    pub realized_pnl: f64,
    /// (exit - entry) / entry, as a fraction.
    pub return_pct: f64,
    /// Holding period in days.
    pub holding_days: f64,
    pub entry_order_id: OrderId,
    pub exit_order_id: OrderId,
}

impl CompletedTrade {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }
}
