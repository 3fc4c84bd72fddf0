use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;
use crate::sizers::Sizer;
use tracing::warn;

/// Percent-of-equity sizing: `floor(equity * pct / price)`.
#[derive(Debug, Clone)]
pub struct PercentSizer {
    equity_pct: f64,
}

impl PercentSizer {
    pub fn new(equity_pct: f64) -> Self {
        Self { equity_pct }
    }
}

impl Sizer for PercentSizer {
    fn quantity(&self, _signal: &Signal, portfolio: &Portfolio, price: f64) -> u64 {
        if price <= 0.0 {
            warn!(price, "percent sizer given non-positive price");
            return 0;
        }
        let position_value = portfolio.total_value() * self.equity_pct;
        (position_value / price).floor() as u64
    }

    fn name(&self) -> &'static str {
        "percent_of_equity"
    }
}
