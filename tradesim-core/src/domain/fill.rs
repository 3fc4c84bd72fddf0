//! Fill report — the single authoritative input to ledger and tracker updates.

use crate::domain::ids::OrderId;
use crate::domain::order::OrderSide;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Outcome of one matching attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStatus {
    Filled,
    PartiallyFilled,
    Canceled,
    Rejected,
}

/// Machine-readable reason for a zero-fill outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReject {
    /// No bar context has been set for the order's symbol.
    NoMarket,
    /// The volume cap leaves nothing to fill this bar.
    NoLiquidity,
    /// FOK order could not be filled in full.
    FokUnfillable,
    /// Limit price not crossable within the bar range.
    LimitNotCrossed,
    /// Stop price not reached by the bar range.
    StopNotTriggered,
}

impl MatchReject {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReject::NoMarket => "no_market",
            MatchReject::NoLiquidity => "no_liquidity",
            MatchReject::FokUnfillable => "fok_unfillable",
            MatchReject::LimitNotCrossed => "limit_not_crossed",
            MatchReject::StopNotTriggered => "stop_not_triggered",
        }
    }
}

impl std::fmt::Display for MatchReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution report for one order/bar matching attempt.
///
/// Downstream consumers (ledger, trade tracker, audit log) read only this
/// report; the original order quantity and price are never used past here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub status: FillStatus,
    pub filled_qty: u64,
    pub fill_price: f64,
    /// Absolute deviation of the fill price from the reference price.
    pub slippage: f64,
    pub timestamp: NaiveDateTime,
    pub reason: Option<MatchReject>,
}

impl FillReport {
    /// True when the report carries quantity the ledger must apply.
    pub fn is_fill(&self) -> bool {
        self.filled_qty > 0
            && matches!(
                self.status,
                FillStatus::Filled | FillStatus::PartiallyFilled
            )
    }
}
