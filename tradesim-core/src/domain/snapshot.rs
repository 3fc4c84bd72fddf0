use crate::domain::bar::Bar;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point-in-time cross-sectional view of the market, built once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: NaiveDateTime,
    /// Latest price per symbol.
    pub prices: HashMap<String, f64>,
    /// Current bar per symbol, when the tick came from a bar stream.
    pub bars: HashMap<String, Bar>,
}

impl MarketSnapshot {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self { timestamp, prices: HashMap::new(), bars: HashMap::new() }
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}
