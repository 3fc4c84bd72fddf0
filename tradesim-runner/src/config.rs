//! TOML run configuration.
//!
//! Parses `[run]`, `[matching]`, `[risk]`, `[stops]`, and `[trading]`
//! sections into the core `EngineConfig` exactly once at boundary entry;
//! downstream code only ever sees closed enums and typed numbers. All
//! percentages are fractions (0.02 = 2%).

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use tradesim_core::config::{DataType, EngineConfig, RiskConfig, StopConfig, TradingConfig};
use tradesim_core::domain::{TimeInForce, Timeframe};
use tradesim_core::execution::matching::{FillAt, MatchConfig};

/// Top-level run configuration from a TOML file.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub run: RunSection,
    #[serde(default)]
    pub matching: MatchingSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub stops: StopsSection,
    #[serde(default)]
    pub trading: TradingSection,
}

#[derive(Debug, Deserialize)]
pub struct RunSection {
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub log_orders: bool,
    #[serde(default)]
    pub order_log_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MatchingSection {
    pub fill_at: Option<String>,
    pub slippage_bps: Option<f64>,
    pub max_volume_pct: Option<f64>,
    pub default_tif: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    pub max_position_size: Option<u64>,
    pub max_position_value: Option<f64>,
    pub max_total_exposure: Option<f64>,
    pub max_orders_per_minute: Option<usize>,
    pub max_orders_per_minute_per_symbol: Option<usize>,
    pub min_cash_buffer: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StopsSection {
    pub position_stop_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub portfolio_stop_pct: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub use_trailing_stops: Option<bool>,
    pub enable_circuit_breaker: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TradingSection {
    pub paper_mode: Option<bool>,
    pub dry_run: Option<bool>,
    pub enable_trading: Option<bool>,
    pub data_type: Option<String>,
}

fn default_capital() -> f64 {
    100_000.0
}

fn default_timeframe() -> String {
    "1Day".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),

    #[error("toml parse error: {0}")]
    Parse(String),

    #[error("unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("invalid date {0}; expected YYYY-MM-DD")]
    InvalidDate(String),
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn timeframe(&self) -> Result<Timeframe, ConfigError> {
        parse_timeframe(&self.run.timeframe)
    }

    pub fn start_date(&self) -> Result<NaiveDate, ConfigError> {
        parse_date(&self.run.start_date)
    }

    pub fn end_date(&self) -> Result<NaiveDate, ConfigError> {
        parse_date(&self.run.end_date)
    }

    /// Lower the TOML sections onto the core engine configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();

        let matching = MatchConfig {
            fill_at: match self.matching.fill_at.as_deref() {
                None => FillAt::Close,
                Some("open") => FillAt::Open,
                Some("close") => FillAt::Close,
                Some("vwap") => FillAt::Vwap,
                Some(other) => {
                    return Err(ConfigError::UnknownValue {
                        field: "matching.fill_at",
                        value: other.to_string(),
                    })
                }
            },
            slippage_bps: self.matching.slippage_bps.unwrap_or(0.0),
            max_volume_pct: self.matching.max_volume_pct.unwrap_or(0.10),
            default_tif: match self.matching.default_tif.as_deref() {
                None => TimeInForce::Ioc,
                Some("day") => TimeInForce::Day,
                Some("gtc") => TimeInForce::Gtc,
                Some("ioc") => TimeInForce::Ioc,
                Some("fok") => TimeInForce::Fok,
                Some(other) => {
                    return Err(ConfigError::UnknownValue {
                        field: "matching.default_tif",
                        value: other.to_string(),
                    })
                }
            },
        };

        let risk_defaults = RiskConfig::default();
        let risk = RiskConfig {
            max_position_size: self
                .risk
                .max_position_size
                .unwrap_or(risk_defaults.max_position_size),
            max_position_value: self
                .risk
                .max_position_value
                .unwrap_or(risk_defaults.max_position_value),
            max_total_exposure: self
                .risk
                .max_total_exposure
                .unwrap_or(risk_defaults.max_total_exposure),
            max_orders_per_minute: self
                .risk
                .max_orders_per_minute
                .unwrap_or(risk_defaults.max_orders_per_minute),
            max_orders_per_minute_per_symbol: self
                .risk
                .max_orders_per_minute_per_symbol
                .unwrap_or(risk_defaults.max_orders_per_minute_per_symbol),
            min_cash_buffer: self.risk.min_cash_buffer.unwrap_or(risk_defaults.min_cash_buffer),
        };

        let stop_defaults = StopConfig::default();
        let stops = StopConfig {
            position_stop_pct: self
                .stops
                .position_stop_pct
                .unwrap_or(stop_defaults.position_stop_pct),
            trailing_stop_pct: self
                .stops
                .trailing_stop_pct
                .unwrap_or(stop_defaults.trailing_stop_pct),
            portfolio_stop_pct: self
                .stops
                .portfolio_stop_pct
                .unwrap_or(stop_defaults.portfolio_stop_pct),
            max_drawdown_pct: self
                .stops
                .max_drawdown_pct
                .unwrap_or(stop_defaults.max_drawdown_pct),
            use_trailing_stops: self
                .stops
                .use_trailing_stops
                .unwrap_or(stop_defaults.use_trailing_stops),
            enable_circuit_breaker: self
                .stops
                .enable_circuit_breaker
                .unwrap_or(stop_defaults.enable_circuit_breaker),
        };

        let trading_defaults = TradingConfig::default();
        let trading = TradingConfig {
            paper_mode: self.trading.paper_mode.unwrap_or(trading_defaults.paper_mode),
            dry_run: self.trading.dry_run.unwrap_or(trading_defaults.dry_run),
            enable_trading: self
                .trading
                .enable_trading
                .unwrap_or(trading_defaults.enable_trading),
            data_type: match self.trading.data_type.as_deref() {
                None => DataType::Bars,
                Some("trades") => DataType::Trades,
                Some("quotes") => DataType::Quotes,
                Some("bars") => DataType::Bars,
                Some(other) => {
                    return Err(ConfigError::UnknownValue {
                        field: "trading.data_type",
                        value: other.to_string(),
                    })
                }
            },
        };

        Ok(EngineConfig {
            initial_capital: self.run.initial_capital,
            matching,
            risk,
            stops,
            trading,
            log_orders: self.run.log_orders,
            order_log_path: self.run.order_log_path.as_ref().map(Into::into),
            ..defaults
        })
    }
}

fn parse_timeframe(value: &str) -> Result<Timeframe, ConfigError> {
    match value {
        "1Min" => Ok(Timeframe::Min1),
        "5Min" => Ok(Timeframe::Min5),
        "15Min" => Ok(Timeframe::Min15),
        "30Min" => Ok(Timeframe::Min30),
        "1Hour" => Ok(Timeframe::Hour1),
        "4Hour" => Ok(Timeframe::Hour4),
        "1Day" => Ok(Timeframe::Day1),
        "1Week" => Ok(Timeframe::Week1),
        other => Err(ConfigError::UnknownValue {
            field: "run.timeframe",
            value: other.to_string(),
        }),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidDate(value.to_string()))
}
