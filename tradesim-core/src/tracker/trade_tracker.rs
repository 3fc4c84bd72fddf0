//! FIFO round-trip trade matching.
//!
//! Opening fills enqueue lots; closing fills peel from the head of the
//! queue until exhausted, emitting one [`CompletedTrade`] per peel. After
//! every application, the sum of remaining lots for a symbol must equal
//! the ledger's position quantity exactly — any divergence is a
//! programming error and fatal to the run.

use crate::domain::fill::FillReport;
use crate::domain::ids::OrderId;
use crate::domain::order::OrderSide;
use crate::domain::portfolio::Portfolio;
use crate::domain::trade::CompletedTrade;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::debug;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One FIFO entry: the unmatched remainder of an opening fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLot {
    pub quantity: u64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub entry_order_id: OrderId,
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    /// A sell fill exceeded the open long lots; short opens are not modeled.
    #[error("sell fill for {symbol} exceeds open lots by {unmatched}; short opens are unsupported")]
    ShortOpen { symbol: String, unmatched: u64 },

    /// Tracker and ledger disagree on the open quantity. Fatal.
    #[error("tracker/ledger divergence for {symbol}: lots hold {lots}, ledger holds {ledger}")]
    LedgerDivergence {
        symbol: String,
        lots: u64,
        ledger: i64,
    },
}

/// FIFO matcher from fills to completed round-trip trades.
#[derive(Debug, Default)]
pub struct TradeTracker {
    lots: BTreeMap<String, VecDeque<OpenLot>>,
    completed: Vec<CompletedTrade>,
}

impl TradeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fill report into the open-lot queues. Zero-fill reports
    /// are ignored.
    pub fn process_fill(&mut self, report: &FillReport) -> Result<(), TrackerError> {
        if !report.is_fill() {
            return Ok(());
        }
        match report.side {
            OrderSide::Buy => {
                self.lots
                    .entry(report.symbol.clone())
                    .or_default()
                    .push_back(OpenLot {
                        quantity: report.filled_qty,
                        entry_price: report.fill_price,
                        entry_time: report.timestamp,
                        entry_order_id: report.order_id,
                    });
                debug!(
                    symbol = %report.symbol,
                    qty = report.filled_qty,
                    price = report.fill_price,
                    "lot opened"
                );
                Ok(())
            }
            OrderSide::Sell => self.close_fifo(report),
        }
    }

    fn close_fifo(&mut self, report: &FillReport) -> Result<(), TrackerError> {
        let queue = self.lots.entry(report.symbol.clone()).or_default();
        let mut remaining = report.filled_qty;

        while remaining > 0 {
            let Some(lot) = queue.front_mut() else {
                return Err(TrackerError::ShortOpen {
                    symbol: report.symbol.clone(),
                    unmatched: remaining,
                });
            };

            let matched = remaining.min(lot.quantity);
            let pnl = matched as f64 * (report.fill_price - lot.entry_price);
            let return_pct = if lot.entry_price > 0.0 {
                (report.fill_price - lot.entry_price) / lot.entry_price
            } else {
                0.0
            };
            let holding_days = (report.timestamp - lot.entry_time).num_seconds() as f64
                / SECONDS_PER_DAY;

            self.completed.push(CompletedTrade {
                symbol: report.symbol.clone(),
                entry_time: lot.entry_time,
                exit_time: report.timestamp,
                entry_price: lot.entry_price,
                exit_price: report.fill_price,
                quantity: matched,
                realized_pnl: pnl,
                return_pct,
                holding_days,
                entry_order_id: lot.entry_order_id,
                exit_order_id: report.order_id,
            });
            debug!(
                symbol = %report.symbol,
                qty = matched,
                entry = lot.entry_price,
                exit = report.fill_price,
                pnl,
                "round trip closed"
            );

            remaining -= matched;
            if matched == lot.quantity {
                queue.pop_front();
            } else {
                lot.quantity -= matched;
            }
        }

        if queue.is_empty() {
            self.lots.remove(&report.symbol);
        }
        Ok(())
    }

    /// Sum of open lot quantities for a symbol.
    pub fn open_quantity(&self, symbol: &str) -> u64 {
        self.lots
            .get(symbol)
            .map_or(0, |queue| queue.iter().map(|lot| lot.quantity).sum())
    }

    pub fn open_lots(&self, symbol: &str) -> Option<&VecDeque<OpenLot>> {
        self.lots.get(symbol)
    }

    /// Assert that every symbol's open lots agree with the ledger,
    /// integer-exactly. Divergence is fatal.
    pub fn check_invariant(&self, ledger: &Portfolio) -> Result<(), TrackerError> {
        for (symbol, queue) in &self.lots {
            let lots: u64 = queue.iter().map(|lot| lot.quantity).sum();
            let held = ledger.position_quantity(symbol);
            if held != lots as i64 {
                return Err(TrackerError::LedgerDivergence {
                    symbol: symbol.clone(),
                    lots,
                    ledger: held,
                });
            }
        }
        // Ledger positions with no lot queue at all must be flat.
        for (symbol, position) in &ledger.positions {
            if !self.lots.contains_key(symbol) && position.quantity != 0 {
                return Err(TrackerError::LedgerDivergence {
                    symbol: symbol.clone(),
                    lots: 0,
                    ledger: position.quantity,
                });
            }
        }
        Ok(())
    }

    pub fn trades(&self) -> &[CompletedTrade] {
        &self.completed
    }

    pub fn trade_count(&self) -> usize {
        self.completed.len()
    }

    pub fn total_pnl(&self) -> f64 {
        self.completed.iter().map(|t| t.realized_pnl).sum()
    }

    pub fn into_trades(self) -> Vec<CompletedTrade> {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fill::FillStatus;
    use chrono::{Duration, NaiveDate};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn fill(id: u64, side: OrderSide, qty: u64, price: f64, at: NaiveDateTime) -> FillReport {
        FillReport {
            order_id: OrderId(id),
            symbol: "AAPL".into(),
            side,
            status: FillStatus::Filled,
            filled_qty: qty,
            fill_price: price,
            slippage: 0.0,
            timestamp: at,
            reason: None,
        }
    }

    #[test]
    fn simple_round_trip() {
        let mut tracker = TradeTracker::new();
        tracker.process_fill(&fill(1, OrderSide::Buy, 100, 100.0, ts())).unwrap();
        tracker
            .process_fill(&fill(2, OrderSide::Sell, 100, 108.0, ts() + Duration::days(2)))
            .unwrap();

        assert_eq!(tracker.trade_count(), 1);
        let trade = &tracker.trades()[0];
        assert_eq!(trade.quantity, 100);
        assert!((trade.realized_pnl - 800.0).abs() < 1e-10);
        assert!((trade.return_pct - 0.08).abs() < 1e-10);
        assert!((trade.holding_days - 2.0).abs() < 1e-10);
        assert_eq!(trade.entry_order_id, OrderId(1));
        assert_eq!(trade.exit_order_id, OrderId(2));
        assert_eq!(tracker.open_quantity("AAPL"), 0);
    }

    #[test]
    fn fifo_peels_across_lots() {
        // BUY 100@10, BUY 50@12, SELL 120: trades (100@10), (20@12), lot (30@12) left.
        let mut tracker = TradeTracker::new();
        tracker.process_fill(&fill(1, OrderSide::Buy, 100, 10.0, ts())).unwrap();
        tracker.process_fill(&fill(2, OrderSide::Buy, 50, 12.0, ts())).unwrap();
        tracker
            .process_fill(&fill(3, OrderSide::Sell, 120, 15.0, ts() + Duration::days(1)))
            .unwrap();

        assert_eq!(tracker.trade_count(), 2);
        assert_eq!(tracker.trades()[0].quantity, 100);
        assert_eq!(tracker.trades()[0].entry_price, 10.0);
        assert_eq!(tracker.trades()[1].quantity, 20);
        assert_eq!(tracker.trades()[1].entry_price, 12.0);

        let lots = tracker.open_lots("AAPL").unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, 30);
        assert_eq!(lots[0].entry_price, 12.0);
        assert_eq!(tracker.open_quantity("AAPL"), 30);
    }

    #[test]
    fn split_fill_matches_single_fill_pnl() {
        let one_shot = {
            let mut tracker = TradeTracker::new();
            tracker.process_fill(&fill(1, OrderSide::Buy, 100, 50.0, ts())).unwrap();
            tracker
                .process_fill(&fill(2, OrderSide::Sell, 100, 55.0, ts() + Duration::days(1)))
                .unwrap();
            tracker.total_pnl()
        };
        let split = {
            let mut tracker = TradeTracker::new();
            tracker.process_fill(&fill(1, OrderSide::Buy, 50, 50.0, ts())).unwrap();
            tracker.process_fill(&fill(2, OrderSide::Buy, 50, 50.0, ts())).unwrap();
            tracker
                .process_fill(&fill(3, OrderSide::Sell, 50, 55.0, ts() + Duration::days(1)))
                .unwrap();
            tracker
                .process_fill(&fill(4, OrderSide::Sell, 50, 55.0, ts() + Duration::days(1)))
                .unwrap();
            tracker.total_pnl()
        };
        assert!((one_shot - split).abs() < 1e-10);
    }

    #[test]
    fn oversell_is_a_short_open_error() {
        let mut tracker = TradeTracker::new();
        tracker.process_fill(&fill(1, OrderSide::Buy, 50, 10.0, ts())).unwrap();
        let err = tracker
            .process_fill(&fill(2, OrderSide::Sell, 80, 12.0, ts()))
            .unwrap_err();
        assert_eq!(err, TrackerError::ShortOpen { symbol: "AAPL".into(), unmatched: 30 });
    }

    #[test]
    fn invariant_agrees_with_ledger() {
        let mut tracker = TradeTracker::new();
        let mut ledger = Portfolio::new(100_000.0);

        let buy = fill(1, OrderSide::Buy, 100, 10.0, ts());
        tracker.process_fill(&buy).unwrap();
        ledger.apply_fill(&buy).unwrap();
        tracker.check_invariant(&ledger).unwrap();

        let sell = fill(2, OrderSide::Sell, 40, 12.0, ts());
        tracker.process_fill(&sell).unwrap();
        ledger.apply_fill(&sell).unwrap();
        tracker.check_invariant(&ledger).unwrap();
        assert_eq!(tracker.open_quantity("AAPL"), 60);
    }

    #[test]
    fn invariant_detects_divergence() {
        let mut tracker = TradeTracker::new();
        let mut ledger = Portfolio::new(100_000.0);

        tracker.process_fill(&fill(1, OrderSide::Buy, 100, 10.0, ts())).unwrap();
        // Ledger saw a different quantity: divergence.
        ledger.apply_fill(&fill(1, OrderSide::Buy, 90, 10.0, ts())).unwrap();

        let err = tracker.check_invariant(&ledger).unwrap_err();
        assert_eq!(
            err,
            TrackerError::LedgerDivergence { symbol: "AAPL".into(), lots: 100, ledger: 90 }
        );
    }
}
