//! Position sizers — translate a signal into an order quantity.
//!
//! Sizers are pure: equity + signal + price in, integer share count out.
//! They never decide direction (the signal's job) and never mutate state.

pub mod fixed;
pub mod kelly;
pub mod percent;
pub mod risk_based;
pub mod volatility;

pub use fixed::FixedSizer;
pub use kelly::KellySizer;
pub use percent::PercentSizer;
pub use risk_based::RiskBasedSizer;
pub use volatility::VolatilitySizer;

use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;

/// Position sizing interface.
pub trait Sizer: Send + Sync {
    /// Number of shares to trade for `signal` at `price`. Zero means skip.
    fn quantity(&self, signal: &Signal, portfolio: &Portfolio, price: f64) -> u64;

    /// Sizer name for logging and manifests.
    fn name(&self) -> &'static str;
}
