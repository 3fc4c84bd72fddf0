//! Ledger: cash plus a flat map of per-symbol positions.
//!
//! Mutated exclusively by the engine loop through [`Portfolio::apply_fill`].
//! Cost basis rules: volume-weighted average on same-direction fills, basis
//! retained on partial exits, position pruned when quantity reaches zero.
//! Mark-to-market never alters cost basis.

use crate::domain::fill::FillReport;
use crate::domain::position::Position;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    /// A sell fill larger than the held long quantity would open a short
    /// position, which this ledger does not model.
    #[error("sell of {sell_qty} {symbol} exceeds held quantity {held}; short opens are unsupported")]
    ShortOpenUnsupported {
        symbol: String,
        held: i64,
        sell_qty: u64,
    },
}

/// Portfolio ledger. Positions are keyed by symbol in a BTreeMap so that
/// every iteration order is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub positions: BTreeMap<String, Position>,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self { cash: initial_cash, positions: BTreeMap::new() }
    }

    /// Apply a non-zero fill report atomically: position quantity, cost
    /// basis, and cash move together. Zero-fill reports are ignored.
    pub fn apply_fill(&mut self, report: &FillReport) -> Result<(), LedgerError> {
        if !report.is_fill() {
            return Ok(());
        }

        let signed_qty = report.filled_qty as i64 * report.side.multiplier();
        let held = self.position_quantity(&report.symbol);
        let new_qty = held + signed_qty;

        // Long-only: refuse fills that would flip the position through zero
        // or open a short from flat.
        if new_qty < 0 {
            return Err(LedgerError::ShortOpenUnsupported {
                symbol: report.symbol.clone(),
                held,
                sell_qty: report.filled_qty,
            });
        }

        let entry = self
            .positions
            .entry(report.symbol.clone())
            .or_insert_with(|| Position::new(report.symbol.clone(), 0, 0.0));

        if held == 0 || held.signum() == signed_qty.signum() {
            // Opening or adding: volume-weighted average cost.
            let prior = held as f64 * entry.avg_price;
            let added = signed_qty as f64 * report.fill_price;
            entry.avg_price = (prior + added) / new_qty as f64;
        }
        // Closing fill (signs differ): basis retained until full close,
        // so a partial exit never resets the remaining cost basis.

        entry.quantity = new_qty;
        entry.mark_price = report.fill_price;

        self.cash -=
            report.filled_qty as f64 * report.fill_price * report.side.multiplier() as f64;

        if new_qty == 0 {
            self.positions.remove(&report.symbol);
        }
        Ok(())
    }

    /// Re-mark every position from `prices`. Symbols missing from the map
    /// retain their last mark. Cost basis is untouched.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                position.mark_price = price;
            }
        }
    }

    /// Total value: cash + sum of quantity x mark price.
    pub fn total_value(&self) -> f64 {
        self.cash + self.positions.values().map(Position::market_value).sum::<f64>()
    }

    /// Sum of absolute position values, for exposure checks.
    pub fn total_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.market_value().abs()).sum()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Signed quantity held in `symbol`, zero when flat.
    pub fn position_quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }
}
