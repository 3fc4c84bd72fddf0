//! Pre-trade order validation.
//!
//! Checks run short-circuited in a fixed order; the first failure names the
//! rejection. Rejections are audit events only and never touch the ledger.
//! Rate-limit windows are rings of caller-supplied timestamps, so backtests
//! stay off the wall clock.

use crate::config::RiskConfig;
use crate::domain::order::OrderSide;
use crate::domain::portfolio::Portfolio;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::warn;

/// Stable machine-readable rejection code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    RateLimitGlobal,
    RateLimitSymbol,
    InsufficientCapital,
    PositionSizeLimit,
    PositionValueLimit,
    TotalExposureLimit,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::RateLimitGlobal => "rate_limit_global",
            RejectCode::RateLimitSymbol => "rate_limit_symbol",
            RejectCode::InsufficientCapital => "insufficient_capital",
            RejectCode::PositionSizeLimit => "position_size_limit",
            RejectCode::PositionValueLimit => "position_value_limit",
            RejectCode::TotalExposureLimit => "total_exposure_limit",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("order rejected ({}): {detail}", code.as_str())]
pub struct ValidationRejection {
    pub code: RejectCode,
    pub detail: String,
}

const RATE_WINDOW_SECS: i64 = 60;

/// Pre-trade validator with sliding-window rate limits.
#[derive(Debug)]
pub struct OrderValidator {
    config: RiskConfig,
    submissions: VecDeque<NaiveDateTime>,
    symbol_submissions: HashMap<String, VecDeque<NaiveDateTime>>,
}

impl OrderValidator {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            submissions: VecDeque::new(),
            symbol_submissions: HashMap::new(),
        }
    }

    /// Validate one prospective order against all checks, in order:
    /// global rate limit, per-symbol rate limit, capital, position size,
    /// position value, total exposure.
    pub fn validate(
        &mut self,
        now: NaiveDateTime,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        reference_price: f64,
        portfolio: &Portfolio,
        current_prices: &HashMap<String, f64>,
    ) -> Result<(), ValidationRejection> {
        self.prune(now);

        if self.submissions.len() >= self.config.max_orders_per_minute {
            return Err(self.rejected(RejectCode::RateLimitGlobal, format!(
                "{} orders in the trailing 60s (limit {})",
                self.submissions.len(),
                self.config.max_orders_per_minute
            )));
        }

        let symbol_count = self.symbol_submissions.get(symbol).map_or(0, VecDeque::len);
        if symbol_count >= self.config.max_orders_per_minute_per_symbol {
            return Err(self.rejected(RejectCode::RateLimitSymbol, format!(
                "{symbol_count} {symbol} orders in the trailing 60s (limit {})",
                self.config.max_orders_per_minute_per_symbol
            )));
        }

        if side == OrderSide::Buy {
            let order_value = quantity as f64 * reference_price;
            let available = portfolio.cash - self.config.min_cash_buffer;
            if order_value > available {
                return Err(self.rejected(RejectCode::InsufficientCapital, format!(
                    "order value {order_value:.2} exceeds available cash {available:.2} \
                     (cash {:.2}, buffer {:.2})",
                    portfolio.cash, self.config.min_cash_buffer
                )));
            }
        }

        let held = portfolio.position_quantity(symbol);
        let new_qty = held + quantity as i64 * side.multiplier();
        if new_qty.unsigned_abs() > self.config.max_position_size {
            return Err(self.rejected(RejectCode::PositionSizeLimit, format!(
                "resulting position {new_qty} in {symbol} exceeds limit {}",
                self.config.max_position_size
            )));
        }

        let mark = current_prices.get(symbol).copied().unwrap_or(reference_price);
        let position_value = new_qty.unsigned_abs() as f64 * mark;
        if position_value > self.config.max_position_value {
            return Err(self.rejected(RejectCode::PositionValueLimit, format!(
                "resulting position value {position_value:.2} in {symbol} exceeds limit {:.2}",
                self.config.max_position_value
            )));
        }

        // Sells reduce exposure; only buys add the order's value.
        let order_value = if side == OrderSide::Buy {
            quantity as f64 * reference_price
        } else {
            0.0
        };
        let exposure = portfolio.total_exposure() + order_value;
        if exposure > self.config.max_total_exposure {
            return Err(self.rejected(RejectCode::TotalExposureLimit, format!(
                "total exposure {exposure:.2} exceeds limit {:.2}",
                self.config.max_total_exposure
            )));
        }

        Ok(())
    }

    /// Record a successful submission for rate limiting. Call after the
    /// order has actually been sent.
    pub fn record_order(&mut self, now: NaiveDateTime, symbol: &str) {
        self.submissions.push_back(now);
        self.symbol_submissions
            .entry(symbol.to_string())
            .or_default()
            .push_back(now);
    }

    /// Orders recorded in the trailing window as of `now`.
    pub fn orders_in_window(&mut self, now: NaiveDateTime) -> usize {
        self.prune(now);
        self.submissions.len()
    }

    fn prune(&mut self, now: NaiveDateTime) {
        let cutoff = now - Duration::seconds(RATE_WINDOW_SECS);
        while self.submissions.front().is_some_and(|&t| t < cutoff) {
            self.submissions.pop_front();
        }
        self.symbol_submissions.retain(|_, window| {
            while window.front().is_some_and(|&t| t < cutoff) {
                window.pop_front();
            }
            !window.is_empty()
        });
    }

    fn rejected(&self, code: RejectCode, detail: String) -> ValidationRejection {
        warn!(code = code.as_str(), %detail, "pre-trade rejection");
        ValidationRejection { code, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fill::{FillReport, FillStatus};
    use crate::domain::ids::OrderId;
    use chrono::{Duration, NaiveDate};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(9, 30, 0).unwrap()
    }

    fn validator() -> OrderValidator {
        OrderValidator::new(RiskConfig {
            max_position_size: 500,
            max_position_value: 60_000.0,
            max_total_exposure: 100_000.0,
            max_orders_per_minute: 3,
            max_orders_per_minute_per_symbol: 2,
            min_cash_buffer: 1_000.0,
        })
    }

    fn portfolio_with(symbol: &str, qty: u64, price: f64, cash: f64) -> Portfolio {
        let mut portfolio = Portfolio::new(cash + qty as f64 * price);
        portfolio
            .apply_fill(&FillReport {
                order_id: OrderId(99),
                symbol: symbol.into(),
                side: OrderSide::Buy,
                status: FillStatus::Filled,
                filled_qty: qty,
                fill_price: price,
                slippage: 0.0,
                timestamp: ts(),
                reason: None,
            })
            .unwrap();
        portfolio
    }

    #[test]
    fn passes_all_checks() {
        let mut validator = validator();
        let portfolio = Portfolio::new(50_000.0);
        let result = validator.validate(
            ts(),
            "AAPL",
            OrderSide::Buy,
            100,
            150.0,
            &portfolio,
            &HashMap::new(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn global_rate_limit_fires_first() {
        let mut validator = validator();
        let portfolio = Portfolio::new(50_000.0);
        for i in 0..3 {
            validator.record_order(ts() + Duration::seconds(i), "AAPL");
        }
        let err = validator
            .validate(ts() + Duration::seconds(5), "MSFT", OrderSide::Buy, 1, 10.0, &portfolio, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code, RejectCode::RateLimitGlobal);
    }

    #[test]
    fn symbol_rate_limit() {
        let mut validator = validator();
        let portfolio = Portfolio::new(50_000.0);
        validator.record_order(ts(), "AAPL");
        validator.record_order(ts() + Duration::seconds(1), "AAPL");
        let err = validator
            .validate(ts() + Duration::seconds(5), "AAPL", OrderSide::Buy, 1, 10.0, &portfolio, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code, RejectCode::RateLimitSymbol);
    }

    #[test]
    fn window_slides_forward() {
        let mut validator = validator();
        for i in 0..3 {
            validator.record_order(ts() + Duration::seconds(i), "AAPL");
        }
        assert_eq!(validator.orders_in_window(ts() + Duration::seconds(10)), 3);
        // 61 seconds after the first order, it falls out of the window.
        assert_eq!(validator.orders_in_window(ts() + Duration::seconds(61)), 2);
        assert_eq!(validator.orders_in_window(ts() + Duration::seconds(120)), 0);
    }

    #[test]
    fn capital_check_respects_buffer() {
        let mut validator = validator();
        let portfolio = Portfolio::new(10_000.0);
        // 100 * 95 = 9,500 > 10,000 - 1,000.
        let err = validator
            .validate(ts(), "AAPL", OrderSide::Buy, 100, 95.0, &portfolio, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code, RejectCode::InsufficientCapital);

        // Sells never need capital.
        let portfolio = portfolio_with("AAPL", 100, 95.0, 0.0);
        assert!(validator
            .validate(ts(), "AAPL", OrderSide::Sell, 100, 95.0, &portfolio, &HashMap::new())
            .is_ok());
    }

    #[test]
    fn position_size_limit_counts_resulting_position() {
        let mut validator = validator();
        let portfolio = portfolio_with("AAPL", 450, 10.0, 100_000.0);
        let err = validator
            .validate(ts(), "AAPL", OrderSide::Buy, 60, 10.0, &portfolio, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code, RejectCode::PositionSizeLimit);
    }

    #[test]
    fn position_value_limit_uses_mark_price() {
        let mut validator = validator();
        let portfolio = Portfolio::new(500_000.0);
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), 200.0);
        // 400 shares * 200 = 80,000 > 60,000.
        let err = validator
            .validate(ts(), "AAPL", OrderSide::Buy, 400, 150.0, &portfolio, &prices)
            .unwrap_err();
        assert_eq!(err.code, RejectCode::PositionValueLimit);
    }

    #[test]
    fn total_exposure_limit() {
        let mut validator = validator();
        // Held: 500 * 150 = 75,000 exposure; cash plenty.
        let mut portfolio = portfolio_with("MSFT", 500, 150.0, 200_000.0);
        portfolio.cash = 200_000.0;
        let err = validator
            .validate(ts(), "AAPL", OrderSide::Buy, 300, 100.0, &portfolio, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code, RejectCode::TotalExposureLimit);
    }

    #[test]
    fn rejection_never_mutates_rate_state() {
        let mut validator = validator();
        let portfolio = Portfolio::new(100.0);
        for _ in 0..5 {
            let _ = validator.validate(
                ts(),
                "AAPL",
                OrderSide::Buy,
                1_000,
                100.0,
                &portfolio,
                &HashMap::new(),
            );
        }
        // Rejected validations are not submissions.
        assert_eq!(validator.orders_in_window(ts()), 0);
    }
}
