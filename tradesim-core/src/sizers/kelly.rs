use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;
use crate::sizers::Sizer;
use tracing::debug;

/// Kelly-criterion sizing.
///
/// `f* = (p*b - q) / b` with win rate `p`, loss rate `q = 1 - p`, and
/// win/loss ratio `b`. The applied fraction is `clamp(f* * kelly_fraction,
/// 0, kelly_cap)`; a non-positive edge sizes to zero. Win statistics are
/// tracked externally and supplied at construction, keeping the sizer pure.
#[derive(Debug, Clone)]
pub struct KellySizer {
    win_rate: f64,
    win_loss_ratio: f64,
    /// Fraction of full Kelly to apply (0.5 = half Kelly).
    kelly_fraction: f64,
    /// Upper bound on the applied fraction of equity.
    kelly_cap: f64,
}

impl KellySizer {
    pub fn new(win_rate: f64, win_loss_ratio: f64) -> Self {
        Self { win_rate, win_loss_ratio, kelly_fraction: 0.5, kelly_cap: 0.25 }
    }

    pub fn with_fraction(mut self, kelly_fraction: f64) -> Self {
        self.kelly_fraction = kelly_fraction;
        self
    }

    pub fn with_cap(mut self, kelly_cap: f64) -> Self {
        self.kelly_cap = kelly_cap;
        self
    }

    /// Raw Kelly fraction; negative when there is no edge.
    pub fn kelly_fraction_raw(&self) -> f64 {
        if self.win_loss_ratio <= 0.0 {
            return 0.0;
        }
        let q = 1.0 - self.win_rate;
        (self.win_rate * self.win_loss_ratio - q) / self.win_loss_ratio
    }
}

impl Sizer for KellySizer {
    fn quantity(&self, _signal: &Signal, portfolio: &Portfolio, price: f64) -> u64 {
        if price <= 0.0 {
            return 0;
        }
        let applied = (self.kelly_fraction_raw() * self.kelly_fraction)
            .clamp(0.0, self.kelly_cap);
        if applied <= 0.0 {
            debug!(
                win_rate = self.win_rate,
                win_loss_ratio = self.win_loss_ratio,
                "kelly sizing: no edge"
            );
            return 0;
        }
        (portfolio.total_value() * applied / price).floor() as u64
    }

    fn name(&self) -> &'static str {
        "kelly"
    }
}
