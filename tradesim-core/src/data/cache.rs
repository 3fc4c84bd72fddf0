//! In-memory bar cache with upsert semantics.
//!
//! Primary key (symbol, timeframe, timestamp); writes are idempotent
//! upserts. An `RwLock` gives concurrent readers with a single writer,
//! which is all the sharing the engine ever needs.

use crate::data::provider::{BarSource, DataError};
use crate::domain::bar::Bar;
use crate::domain::Timeframe;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BarKey {
    symbol: String,
    timeframe: Timeframe,
    timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BarRow {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Key-range bar store.
#[derive(Debug, Default)]
pub struct BarCache {
    rows: RwLock<BTreeMap<BarKey, BarRow>>,
}

impl BarCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the row for the bar's primary key.
    pub fn upsert(&self, bar: &Bar) {
        let key = BarKey {
            symbol: bar.symbol.clone(),
            timeframe: bar.timeframe,
            timestamp: bar.timestamp,
        };
        let row = BarRow {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        };
        self.rows.write().expect("bar cache lock poisoned").insert(key, row);
    }

    pub fn upsert_many<'a>(&self, bars: impl IntoIterator<Item = &'a Bar>) {
        for bar in bars {
            self.upsert(bar);
        }
    }

    /// Range scan over [start, end] for one (symbol, timeframe) partition,
    /// in timestamp order.
    pub fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Vec<Bar> {
        let lo = BarKey { symbol: symbol.to_string(), timeframe, timestamp: start };
        let hi = BarKey { symbol: symbol.to_string(), timeframe, timestamp: end };
        self.rows
            .read()
            .expect("bar cache lock poisoned")
            .range(lo..=hi)
            .map(|(key, row)| Bar {
                symbol: key.symbol.clone(),
                timestamp: key.timestamp,
                timeframe: key.timeframe,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().expect("bar cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BarSource for BarCache {
    fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DataError> {
        let bars = self.range(symbol, timeframe, start, end);
        if bars.is_empty() {
            return Err(DataError::NotFound { symbol: symbol.to_string(), timeframe });
        }
        Ok(bars)
    }
}
