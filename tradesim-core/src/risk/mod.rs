//! Risk layer: per-position stops and the portfolio circuit breaker.

pub mod circuit_breaker;
pub mod manager;
pub mod stops;

pub use circuit_breaker::{BreakerReason, CircuitBreaker};
pub use manager::{ExitReason, ExitSignal, RiskManager};
pub use stops::PositionStop;
