//! tradesim runner
//!
//! Thin orchestration shell around `tradesim-core`: TOML run configuration,
//! logging setup, backtest execution, and artifact export.

pub mod config;
pub mod export;
pub mod runner;

pub use config::{ConfigError, RunConfig};
pub use runner::{init_logging, run_backtest};
