//! Bar source contract.
//!
//! The engine consumes bars through this trait and assumes only that bars
//! arrive in non-decreasing timestamp order per symbol — never that they
//! are clock-aligned across symbols.

use crate::domain::bar::Bar;
use crate::domain::Timeframe;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no data stored for {symbol} {timeframe}")]
    NotFound { symbol: String, timeframe: Timeframe },

    #[error("bars for {symbol} are not in timestamp order")]
    OutOfOrder { symbol: String },

    #[error("bar failed validation: {0}")]
    InvalidBar(#[from] crate::domain::bar::BarError),

    #[error("data source io: {0}")]
    Io(String),
}

/// Ordered historical bar queries.
pub trait BarSource {
    fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DataError>;
}

/// In-memory bar source for tests and historical replay.
#[derive(Debug, Default)]
pub struct MemoryBarSource {
    series: BTreeMap<(String, Timeframe), Vec<Bar>>,
}

impl MemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a bar series. Bars are validated and must already be in
    /// non-decreasing timestamp order.
    pub fn insert_series(&mut self, bars: Vec<Bar>) -> Result<(), DataError> {
        let Some(first) = bars.first() else {
            return Ok(());
        };
        let key = (first.symbol.clone(), first.timeframe);
        for pair in bars.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(DataError::OutOfOrder { symbol: first.symbol.clone() });
            }
        }
        for bar in &bars {
            bar.validate()?;
        }
        self.series.entry(key).or_default().extend(bars);
        Ok(())
    }
}

impl BarSource for MemoryBarSource {
    fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DataError> {
        let key = (symbol.to_string(), timeframe);
        let series = self.series.get(&key).ok_or_else(|| DataError::NotFound {
            symbol: symbol.to_string(),
            timeframe,
        })?;
        Ok(series
            .iter()
            .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
            .cloned()
            .collect())
    }
}
