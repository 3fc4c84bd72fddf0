use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;
use crate::sizers::Sizer;
use tracing::debug;

/// Risk-based sizing: `floor(equity * risk_pct / stop_distance)`.
///
/// The stop distance comes from the signal's `stop_loss` when present,
/// falling back to a configured fraction of the entry price.
#[derive(Debug, Clone)]
pub struct RiskBasedSizer {
    risk_per_trade: f64,
    default_stop_pct: f64,
}

impl RiskBasedSizer {
    pub fn new(risk_per_trade: f64) -> Self {
        Self { risk_per_trade, default_stop_pct: 0.02 }
    }

    pub fn with_default_stop(risk_per_trade: f64, default_stop_pct: f64) -> Self {
        Self { risk_per_trade, default_stop_pct }
    }
}

impl Sizer for RiskBasedSizer {
    fn quantity(&self, signal: &Signal, portfolio: &Portfolio, price: f64) -> u64 {
        let stop_distance = match signal.stop_loss {
            Some(stop) => (price - stop).abs(),
            None => price * self.default_stop_pct,
        };
        if stop_distance <= 0.0 {
            return 0;
        }
        let risk_amount = portfolio.total_value() * self.risk_per_trade;
        let qty = (risk_amount / stop_distance).floor() as u64;
        debug!(risk_amount, stop_distance, qty, "risk-based sizing");
        qty
    }

    fn name(&self) -> &'static str {
        "risk_based"
    }
}
