//! Deterministic matching engine: simulated fills from a reference bar.
//!
//! Given the most recently seen bar for an order's symbol, each matching
//! attempt produces exactly one [`FillReport`]. Fills are constrained by a
//! participation cap (`max_volume_pct` of bar volume), priced at a
//! configurable reference point with one-sided slippage, and shaped by the
//! order's time-in-force. No RNG: identical bar streams and submission
//! order produce byte-identical reports.

use crate::domain::bar::Bar;
use crate::domain::fill::{FillReport, FillStatus, MatchReject};
use crate::domain::order::{Order, OrderError, OrderSide, OrderType, TimeInForce};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Reference price within the bar used for market-style fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillAt {
    Open,
    Close,
    /// Typical price: (high + low + close) / 3.
    Vwap,
}

/// Matching engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub fill_at: FillAt,
    /// Maximum fill as a fraction of bar volume, in [0, 1].
    pub max_volume_pct: f64,
    /// One-sided slippage in basis points of the reference price:
    /// additive for buys, subtractive for sells.
    pub slippage_bps: f64,
    pub default_tif: TimeInForce,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            fill_at: FillAt::Close,
            max_volume_pct: 0.10,
            slippage_bps: 0.0,
            default_tif: TimeInForce::Ioc,
        }
    }
}

/// Deterministic fill simulator with per-symbol bar context.
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    config: MatchConfig,
    bars: HashMap<String, Bar>,
}

impl MatchingEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self { config, bars: HashMap::new() }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Replace the bar context for the bar's symbol.
    pub fn set_bar(&mut self, bar: Bar) {
        self.bars.insert(bar.symbol.clone(), bar);
    }

    pub fn bar(&self, symbol: &str) -> Option<&Bar> {
        self.bars.get(symbol)
    }

    /// Reference price for a bar under the configured fill point.
    pub fn reference_price(&self, bar: &Bar) -> f64 {
        match self.config.fill_at {
            FillAt::Open => bar.open,
            FillAt::Close => bar.close,
            FillAt::Vwap => bar.vwap(),
        }
    }

    /// Attempt to fill `order` against its symbol's current bar context.
    ///
    /// The order must be working (ACKED or PARTIALLY_FILLED); anything else
    /// is a state-machine violation surfaced as [`OrderError`]. A rejected
    /// report never mutates the order, so a working GTC/DAY order simply
    /// stays on the book for the next bar.
    pub fn match_order(&mut self, order: &mut Order) -> Result<FillReport, OrderError> {
        if !order.is_working() {
            return Err(OrderError::InvalidTransition {
                from: order.state,
                to: crate::domain::order::OrderState::Filled,
            });
        }

        let Some(bar) = self.bars.get(&order.symbol) else {
            return Ok(self.zero_report(order, FillStatus::Rejected, MatchReject::NoMarket));
        };
        let bar = bar.clone();

        let reference = self.reference_price(&bar);
        let slipped = apply_slippage(reference, order.side, self.config.slippage_bps);

        // Crossability and target fill price per order type.
        let (crossable, target_price, blocked) = match order.order_type {
            OrderType::Market => (true, slipped, MatchReject::NoLiquidity),
            OrderType::Limit { limit_price } => {
                let crossable = match order.side {
                    OrderSide::Buy => limit_price >= bar.low,
                    OrderSide::Sell => limit_price <= bar.high,
                };
                let price = match order.side {
                    OrderSide::Buy => limit_price.min(slipped),
                    OrderSide::Sell => limit_price.max(slipped),
                };
                (crossable, price, MatchReject::LimitNotCrossed)
            }
            OrderType::Stop { stop_price } => {
                // Armed once the bar range crosses the stop; then a market
                // order at reference with slippage.
                let armed = match order.side {
                    OrderSide::Buy => bar.high >= stop_price,
                    OrderSide::Sell => bar.low <= stop_price,
                };
                (armed, slipped, MatchReject::StopNotTriggered)
            }
            OrderType::StopLimit { stop_price, limit_price } => {
                let armed = match order.side {
                    OrderSide::Buy => bar.high >= stop_price,
                    OrderSide::Sell => bar.low <= stop_price,
                };
                let limit_ok = match order.side {
                    OrderSide::Buy => limit_price >= bar.low,
                    OrderSide::Sell => limit_price <= bar.high,
                };
                let price = match order.side {
                    OrderSide::Buy => limit_price.min(slipped),
                    OrderSide::Sell => limit_price.max(slipped),
                };
                let blocked = if armed {
                    MatchReject::LimitNotCrossed
                } else {
                    MatchReject::StopNotTriggered
                };
                (armed && limit_ok, price, blocked)
            }
        };

        let available = (bar.volume as f64 * self.config.max_volume_pct).floor() as u64;
        let attempt_qty = if crossable {
            order.remaining().min(available)
        } else {
            0
        };
        let reason = if crossable { MatchReject::NoLiquidity } else { blocked };

        let report = self.apply_tif(order, attempt_qty, target_price, reference, reason)?;
        debug!(
            order_id = %report.order_id,
            symbol = %report.symbol,
            status = ?report.status,
            filled_qty = report.filled_qty,
            fill_price = report.fill_price,
            "matching attempt"
        );
        Ok(report)
    }

    fn apply_tif(
        &self,
        order: &mut Order,
        attempt_qty: u64,
        price: f64,
        reference: f64,
        reason: MatchReject,
    ) -> Result<FillReport, OrderError> {
        match order.time_in_force {
            TimeInForce::Fok => {
                if attempt_qty < order.remaining() {
                    // No state change on the order itself; the caller
                    // disposes of the unfillable order.
                    return Ok(self.zero_report(
                        order,
                        FillStatus::Rejected,
                        MatchReject::FokUnfillable,
                    ));
                }
                order.fill(attempt_qty, price)?;
                Ok(self.fill_report(order, FillStatus::Filled, attempt_qty, price, reference))
            }
            TimeInForce::Ioc => {
                if attempt_qty == 0 {
                    order.cancel()?;
                    return Ok(self.zero_report(order, FillStatus::Canceled, reason));
                }
                order.fill(attempt_qty, price)?;
                if order.remaining() == 0 {
                    Ok(self.fill_report(order, FillStatus::Filled, attempt_qty, price, reference))
                } else {
                    // Fill-and-cancel is atomic: the partial fill is
                    // recorded and the remainder dies with the order.
                    order.cancel()?;
                    Ok(self.fill_report(
                        order,
                        FillStatus::PartiallyFilled,
                        attempt_qty,
                        price,
                        reference,
                    ))
                }
            }
            TimeInForce::Gtc | TimeInForce::Day => {
                if attempt_qty == 0 {
                    // Order stays working; the report only records why
                    // nothing happened this bar.
                    return Ok(self.zero_report(order, FillStatus::Rejected, reason));
                }
                order.fill(attempt_qty, price)?;
                let status = if order.remaining() == 0 {
                    FillStatus::Filled
                } else {
                    FillStatus::PartiallyFilled
                };
                Ok(self.fill_report(order, status, attempt_qty, price, reference))
            }
        }
    }

    fn fill_report(
        &self,
        order: &Order,
        status: FillStatus,
        filled_qty: u64,
        fill_price: f64,
        reference: f64,
    ) -> FillReport {
        FillReport {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            filled_qty,
            fill_price,
            slippage: (fill_price - reference).abs(),
            timestamp: order.created_at,
            reason: None,
        }
    }

    fn zero_report(&self, order: &Order, status: FillStatus, reason: MatchReject) -> FillReport {
        FillReport {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            filled_qty: 0,
            fill_price: 0.0,
            slippage: 0.0,
            timestamp: order.created_at,
            reason: Some(reason),
        }
    }
}

fn apply_slippage(reference: f64, side: OrderSide, slippage_bps: f64) -> f64 {
    reference * (1.0 + side.multiplier() as f64 * slippage_bps / 10_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::OrderId;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar::new("SPY", ts(), crate::domain::Timeframe::Day1, open, high, low, close, volume)
    }

    fn engine(config: MatchConfig) -> MatchingEngine {
        let mut engine = MatchingEngine::new(config);
        engine.set_bar(bar(100.0, 102.0, 98.0, 101.0, 10_000));
        engine
    }

    fn order(side: OrderSide, order_type: OrderType, qty: u64, tif: TimeInForce) -> Order {
        let mut order = Order::new(OrderId(1), "SPY", side, order_type, qty, tif, ts());
        order.acknowledge().unwrap();
        order
    }

    #[test]
    fn market_buy_fills_at_close_reference() {
        let mut engine = engine(MatchConfig::default());
        let mut buy = order(OrderSide::Buy, OrderType::Market, 100, TimeInForce::Ioc);

        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::Filled);
        assert_eq!(report.filled_qty, 100);
        assert_eq!(report.fill_price, 101.0);
        assert_eq!(report.slippage, 0.0);
    }

    #[test]
    fn slippage_is_one_sided() {
        let config = MatchConfig { slippage_bps: 50.0, ..MatchConfig::default() };
        let mut engine = engine(config);

        let mut buy = order(OrderSide::Buy, OrderType::Market, 10, TimeInForce::Ioc);
        let report = engine.match_order(&mut buy).unwrap();
        assert!((report.fill_price - 101.0 * 1.005).abs() < 1e-10);
        assert!((report.slippage - 101.0 * 0.005).abs() < 1e-10);

        let mut sell = order(OrderSide::Sell, OrderType::Market, 10, TimeInForce::Ioc);
        let report = engine.match_order(&mut sell).unwrap();
        assert!((report.fill_price - 101.0 * 0.995).abs() < 1e-10);
    }

    #[test]
    fn vwap_reference_price() {
        let config = MatchConfig { fill_at: FillAt::Vwap, ..MatchConfig::default() };
        let mut engine = engine(config);
        let mut buy = order(OrderSide::Buy, OrderType::Market, 10, TimeInForce::Ioc);

        let report = engine.match_order(&mut buy).unwrap();
        // (102 + 98 + 101) / 3
        assert!((report.fill_price - 100.333333333333333).abs() < 1e-9);
    }

    #[test]
    fn no_bar_context_rejects() {
        let mut engine = MatchingEngine::new(MatchConfig::default());
        let mut buy = order(OrderSide::Buy, OrderType::Market, 10, TimeInForce::Ioc);

        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::Rejected);
        assert_eq!(report.reason, Some(MatchReject::NoMarket));
        // Order untouched.
        assert!(buy.is_working());
    }

    #[test]
    fn volume_cap_partially_fills_ioc() {
        let mut engine = MatchingEngine::new(MatchConfig::default());
        engine.set_bar(bar(100.0, 102.0, 98.0, 101.0, 500)); // available = 50

        let mut buy = order(OrderSide::Buy, OrderType::Market, 100, TimeInForce::Ioc);
        let report = engine.match_order(&mut buy).unwrap();

        assert_eq!(report.status, FillStatus::PartiallyFilled);
        assert_eq!(report.filled_qty, 50);
        assert_eq!(buy.state, crate::domain::OrderState::Canceled);
        assert_eq!(buy.filled_qty, 50);
    }

    #[test]
    fn zero_volume_bar_rejects_no_liquidity() {
        let mut engine = MatchingEngine::new(MatchConfig::default());
        engine.set_bar(bar(100.0, 102.0, 98.0, 101.0, 0));

        let mut buy = order(OrderSide::Buy, OrderType::Market, 100, TimeInForce::Gtc);
        let report = engine.match_order(&mut buy).unwrap();

        assert_eq!(report.status, FillStatus::Rejected);
        assert_eq!(report.reason, Some(MatchReject::NoLiquidity));
        assert!(buy.is_working());
    }

    #[test]
    fn fok_rejects_when_short_one_share() {
        let mut engine = MatchingEngine::new(MatchConfig::default());
        engine.set_bar(bar(100.0, 102.0, 98.0, 101.0, 990)); // available = 99

        let mut buy = order(OrderSide::Buy, OrderType::Market, 100, TimeInForce::Fok);
        let report = engine.match_order(&mut buy).unwrap();

        assert_eq!(report.status, FillStatus::Rejected);
        assert_eq!(report.reason, Some(MatchReject::FokUnfillable));
        assert_eq!(buy.filled_qty, 0);
        // FOK rejection leaves the order state untouched.
        assert_eq!(buy.state, crate::domain::OrderState::Acked);
    }

    #[test]
    fn fok_fills_in_full_when_possible() {
        let mut engine = engine(MatchConfig::default());
        let mut buy = order(OrderSide::Buy, OrderType::Market, 100, TimeInForce::Fok);
        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::Filled);
        assert_eq!(report.filled_qty, 100);
    }

    #[test]
    fn gtc_remainder_stays_working() {
        let mut engine = MatchingEngine::new(MatchConfig::default());
        engine.set_bar(bar(100.0, 102.0, 98.0, 101.0, 500)); // available = 50

        let mut buy = order(OrderSide::Buy, OrderType::Market, 120, TimeInForce::Gtc);
        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::PartiallyFilled);
        assert_eq!(report.filled_qty, 50);
        assert!(buy.is_working());
        assert_eq!(buy.remaining(), 70);

        // Next bar fills the rest.
        engine.set_bar(bar(101.0, 103.0, 99.0, 102.0, 10_000));
        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::Filled);
        assert_eq!(report.filled_qty, 70);
        assert_eq!(buy.state, crate::domain::OrderState::Filled);
    }

    #[test]
    fn limit_buy_crossability() {
        let mut engine = engine(MatchConfig::default());

        // Limit below the bar's low: not crossable, GTC stays working.
        let mut low_buy = order(
            OrderSide::Buy,
            OrderType::Limit { limit_price: 97.0 },
            10,
            TimeInForce::Gtc,
        );
        let report = engine.match_order(&mut low_buy).unwrap();
        assert_eq!(report.status, FillStatus::Rejected);
        assert_eq!(report.reason, Some(MatchReject::LimitNotCrossed));
        assert!(low_buy.is_working());

        // Crossable limit fills at min(limit, reference).
        let mut buy = order(
            OrderSide::Buy,
            OrderType::Limit { limit_price: 99.5 },
            10,
            TimeInForce::Ioc,
        );
        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::Filled);
        assert_eq!(report.fill_price, 99.5);
    }

    #[test]
    fn limit_sell_crossability() {
        let mut engine = engine(MatchConfig::default());

        let mut high_sell = order(
            OrderSide::Sell,
            OrderType::Limit { limit_price: 103.0 },
            10,
            TimeInForce::Gtc,
        );
        let report = engine.match_order(&mut high_sell).unwrap();
        assert_eq!(report.reason, Some(MatchReject::LimitNotCrossed));

        let mut sell = order(
            OrderSide::Sell,
            OrderType::Limit { limit_price: 101.5 },
            10,
            TimeInForce::Ioc,
        );
        let report = engine.match_order(&mut sell).unwrap();
        assert_eq!(report.status, FillStatus::Filled);
        // max(limit, reference) for sells.
        assert_eq!(report.fill_price, 101.5);
    }

    #[test]
    fn stop_sell_arms_when_low_crosses() {
        let mut engine = engine(MatchConfig::default());

        // Stop below the bar low: not armed.
        let mut deep_stop = order(
            OrderSide::Sell,
            OrderType::Stop { stop_price: 95.0 },
            10,
            TimeInForce::Gtc,
        );
        let report = engine.match_order(&mut deep_stop).unwrap();
        assert_eq!(report.reason, Some(MatchReject::StopNotTriggered));
        assert!(deep_stop.is_working());

        // Stop within range: armed, fills as market at reference.
        let mut stop = order(
            OrderSide::Sell,
            OrderType::Stop { stop_price: 99.0 },
            10,
            TimeInForce::Ioc,
        );
        let report = engine.match_order(&mut stop).unwrap();
        assert_eq!(report.status, FillStatus::Filled);
        assert_eq!(report.fill_price, 101.0);
    }

    #[test]
    fn ioc_uncrossable_limit_cancels() {
        let mut engine = engine(MatchConfig::default());
        let mut buy = order(
            OrderSide::Buy,
            OrderType::Limit { limit_price: 90.0 },
            10,
            TimeInForce::Ioc,
        );
        let report = engine.match_order(&mut buy).unwrap();
        assert_eq!(report.status, FillStatus::Canceled);
        assert_eq!(report.reason, Some(MatchReject::LimitNotCrossed));
        assert_eq!(buy.state, crate::domain::OrderState::Canceled);
    }

    #[test]
    fn reports_are_reproducible() {
        let make = || {
            let mut engine = engine(MatchConfig { slippage_bps: 25.0, ..MatchConfig::default() });
            let mut buy = order(OrderSide::Buy, OrderType::Market, 100, TimeInForce::Ioc);
            engine.match_order(&mut buy).unwrap()
        };
        let a = serde_json::to_string(&make()).unwrap();
        let b = serde_json::to_string(&make()).unwrap();
        assert_eq!(a, b);
    }
}
