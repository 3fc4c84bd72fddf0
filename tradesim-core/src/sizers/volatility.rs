use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;
use crate::sizers::Sizer;
use tracing::debug;

/// Volatility-normalized sizing: `floor(equity * risk_pct / (atr * mult))`.
///
/// A move of `atr_multiplier` ATRs loses the same equity fraction across
/// assets with different volatilities. The ATR comes from the signal when
/// present, otherwise defaults to a fraction of price.
#[derive(Debug, Clone)]
pub struct VolatilitySizer {
    risk_pct: f64,
    atr_multiplier: f64,
    default_atr_pct: f64,
    /// Hard cap on position value as a fraction of equity.
    max_position_pct: f64,
}

impl VolatilitySizer {
    pub fn new(risk_pct: f64, atr_multiplier: f64) -> Self {
        Self {
            risk_pct,
            atr_multiplier,
            default_atr_pct: 0.02,
            max_position_pct: 0.25,
        }
    }

    pub fn with_default_atr_pct(mut self, default_atr_pct: f64) -> Self {
        self.default_atr_pct = default_atr_pct;
        self
    }

    pub fn with_max_position_pct(mut self, max_position_pct: f64) -> Self {
        self.max_position_pct = max_position_pct;
        self
    }
}

impl Sizer for VolatilitySizer {
    fn quantity(&self, signal: &Signal, portfolio: &Portfolio, price: f64) -> u64 {
        if price <= 0.0 {
            return 0;
        }
        let atr = match signal.atr {
            Some(atr) if atr > 0.0 => atr,
            _ => price * self.default_atr_pct,
        };
        let stop_distance = atr * self.atr_multiplier;
        if stop_distance <= 0.0 {
            return 0;
        }

        let equity = portfolio.total_value();
        let qty = (equity * self.risk_pct / stop_distance).floor() as u64;
        let max_by_value = (equity * self.max_position_pct / price).floor() as u64;
        let qty = qty.min(max_by_value);
        debug!(atr, stop_distance, qty, "volatility sizing");
        qty
    }

    fn name(&self) -> &'static str {
        "volatility"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizers::test_support::buy_signal;

    #[test]
    fn sizes_from_signal_atr() {
        let sizer = VolatilitySizer::new(0.02, 2.0);
        let portfolio = Portfolio::new(100_000.0);
        let mut signal = buy_signal(100.0);
        signal.atr = Some(2.5);
        // risk 2,000 / (2.5 * 2) = 400 shares
        assert_eq!(sizer.quantity(&signal, &portfolio, 100.0), 400);
    }

    #[test]
    fn default_atr_fallback() {
        let sizer = VolatilitySizer::new(0.02, 2.0);
        let portfolio = Portfolio::new(100_000.0);
        // atr = 2, distance = 4, qty = 2000/4 = 500; value 50k > 25% cap
        // -> capped at 25,000 / 100 = 250
        assert_eq!(sizer.quantity(&buy_signal(100.0), &portfolio, 100.0), 250);
    }

    #[test]
    fn position_value_cap_applies() {
        let sizer = VolatilitySizer::new(0.10, 1.0).with_max_position_pct(0.10);
        let portfolio = Portfolio::new(100_000.0);
        let mut signal = buy_signal(100.0);
        signal.atr = Some(1.0);
        // uncapped: 10,000 / 1 = 10,000 shares; cap: 10,000 / 100 = 100
        assert_eq!(sizer.quantity(&signal, &portfolio, 100.0), 100);
    }
}
