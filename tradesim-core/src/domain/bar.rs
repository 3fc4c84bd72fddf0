use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bar timeframe tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1Min")]
    Min1,
    #[serde(rename = "5Min")]
    Min5,
    #[serde(rename = "15Min")]
    Min15,
    #[serde(rename = "30Min")]
    Min30,
    #[serde(rename = "1Hour")]
    Hour1,
    #[serde(rename = "4Hour")]
    Hour4,
    #[serde(rename = "1Day")]
    Day1,
    #[serde(rename = "1Week")]
    Week1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1Min",
            Timeframe::Min5 => "5Min",
            Timeframe::Min15 => "15Min",
            Timeframe::Min30 => "30Min",
            Timeframe::Hour1 => "1Hour",
            Timeframe::Hour4 => "4Hour",
            Timeframe::Day1 => "1Day",
            Timeframe::Week1 => "1Week",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single OHLCV sample. Timestamps are naive UTC.
///
/// Immutable once produced; sources deliver bars in non-decreasing
/// timestamp order per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timestamp: NaiveDateTime,
        timeframe: Timeframe,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self { symbol: symbol.into(), timestamp, timeframe, open, high, low, close, volume }
    }

    /// Validate bar invariants: `low <= open,close <= high`, non-negative prices.
    pub fn validate(&self) -> Result<(), BarError> {
        if self.high < self.low {
            return Err(BarError::InvalidRange { high: self.high, low: self.low });
        }
        if self.open < 0.0 || self.high < 0.0 || self.low < 0.0 || self.close < 0.0 {
            return Err(BarError::NegativePrice);
        }
        if !(self.low..=self.high).contains(&self.open) {
            return Err(BarError::OpenOutOfRange);
        }
        if !(self.low..=self.high).contains(&self.close) {
            return Err(BarError::CloseOutOfRange);
        }
        Ok(())
    }

    /// Typical price: (high + low + close) / 3.
    pub fn vwap(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Bar range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Error)]
pub enum BarError {
    #[error("invalid bar range: high={high}, low={low}")]
    InvalidRange { high: f64, low: f64 },

    #[error("negative price not allowed")]
    NegativePrice,

    #[error("open price outside high/low range")]
    OpenOutOfRange,

    #[error("close price outside high/low range")]
    CloseOutOfRange,
}
