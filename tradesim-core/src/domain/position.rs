use serde::{Deserialize, Serialize};

/// Per-symbol holding: signed quantity, volume-weighted cost basis, and the
/// latest mark price. Cash is held separately on the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub mark_price: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: i64, avg_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            avg_price,
            mark_price: avg_price,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.mark_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.mark_price - self.avg_price) * self.quantity as f64
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}
