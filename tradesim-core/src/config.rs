//! Engine configuration.
//!
//! All percentages are fractions (0.02 = 2%). Parsed once at the boundary
//! into closed enums; the core never re-interprets strings.

use crate::domain::order::TimeInForce;
use crate::execution::matching::MatchConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Type of market data stream driving the live engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Trades,
    Quotes,
    Bars,
}

/// Pre-trade risk limits enforced by the order validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum absolute share count per symbol.
    pub max_position_size: u64,
    /// Maximum absolute dollar value per symbol.
    pub max_position_value: f64,
    /// Maximum total portfolio exposure in dollars.
    pub max_total_exposure: f64,
    /// Global order submissions per trailing 60 s window.
    pub max_orders_per_minute: usize,
    /// Per-symbol order submissions per trailing 60 s window.
    pub max_orders_per_minute_per_symbol: usize,
    /// Cash floor buy orders may not breach.
    pub min_cash_buffer: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: 1_000,
            max_position_value: 100_000.0,
            max_total_exposure: 500_000.0,
            max_orders_per_minute: 100,
            max_orders_per_minute_per_symbol: 20,
            min_cash_buffer: 1_000.0,
        }
    }
}

/// Stop-loss and circuit-breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Fixed per-position stop as a fraction of entry price.
    pub position_stop_pct: f64,
    /// Trailing stop as a fraction of the high-water-mark price.
    pub trailing_stop_pct: f64,
    /// Daily portfolio loss fraction that trips the circuit breaker.
    pub portfolio_stop_pct: f64,
    /// Drawdown-from-HWM fraction that trips the circuit breaker.
    pub max_drawdown_pct: f64,
    pub use_trailing_stops: bool,
    pub enable_circuit_breaker: bool,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            position_stop_pct: 0.02,
            trailing_stop_pct: 0.03,
            portfolio_stop_pct: 0.05,
            max_drawdown_pct: 0.10,
            use_trailing_stops: false,
            enable_circuit_breaker: true,
        }
    }
}

/// Trading-mode switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub paper_mode: bool,
    /// Historical bars drive the simulation path; no broker traffic.
    pub dry_run: bool,
    pub enable_trading: bool,
    pub data_type: DataType,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            paper_mode: true,
            dry_run: false,
            enable_trading: true,
            data_type: DataType::Bars,
        }
    }
}

/// Complete engine configuration shared by backtest and live runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub matching: MatchConfig,
    pub risk: RiskConfig,
    pub stops: StopConfig,
    pub trading: TradingConfig,
    /// Seconds between periodic status lines in the live engine.
    pub status_log_interval_secs: u64,
    /// Minimum seconds between identical signals per symbol (live dedup).
    pub signal_cooldown_secs: u64,
    /// Seconds granted to a broker submission before it is treated as
    /// timed out and the order is rejected locally.
    pub submit_deadline_secs: u64,
    /// Seconds between health snapshot writes in the live engine.
    pub health_snapshot_interval_secs: u64,
    pub log_orders: bool,
    /// Destination of the CSV order audit log when `log_orders` is set.
    pub order_log_path: Option<PathBuf>,
    /// Destination of live health snapshots.
    pub health_snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            matching: MatchConfig::default(),
            risk: RiskConfig::default(),
            stops: StopConfig::default(),
            trading: TradingConfig::default(),
            status_log_interval_secs: 30,
            signal_cooldown_secs: 60,
            submit_deadline_secs: 10,
            health_snapshot_interval_secs: 60,
            log_orders: false,
            order_log_path: None,
            health_snapshot_path: None,
        }
    }
}

impl EngineConfig {
    pub fn with_capital(initial_capital: f64) -> Self {
        Self { initial_capital, ..Self::default() }
    }

    pub fn default_tif(&self) -> TimeInForce {
        self.matching.default_tif
    }
}
