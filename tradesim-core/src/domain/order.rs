//! Order entity and its state machine.
//!
//! Legal transitions:
//! `New -> Acked -> PartiallyFilled -> Filled`, `New -> Rejected`,
//! `{Acked, PartiallyFilled} -> Canceled`. Anything else is
//! [`OrderError::InvalidTransition`]. Once terminal, an order is immutable.

use crate::domain::ids::OrderId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Signed multiplier for cash and position arithmetic: +1 buy, -1 sell.
    pub fn multiplier(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type. Limit and stop prices ride with the variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { limit_price: f64 },
    Stop { stop_price: f64 },
    StopLimit { stop_price: f64, limit_price: f64 },
}

/// Time in force: lifetime policy for an unfilled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    Acked,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("illegal order state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderState, to: OrderState },

    #[error("fill of {requested} exceeds remaining quantity {remaining}")]
    Overfill { requested: u64, remaining: u64 },

    #[error("fill quantity must be positive")]
    ZeroFill,
}

/// A single order with partial-fill accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: u64,
    pub filled_qty: u64,
    /// Size-weighted running mean of fill prices. Only meaningful once
    /// `filled_qty > 0`; use [`Order::avg_fill_price`].
    avg_price: f64,
    pub time_in_force: TimeInForce,
    pub created_at: NaiveDateTime,
    pub state: OrderState,
}

impl Order {
    pub fn new(
        id: OrderId,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: u64,
        time_in_force: TimeInForce,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            filled_qty: 0,
            avg_price: 0.0,
            time_in_force,
            created_at,
            state: OrderState::New,
        }
    }

    /// Unfilled quantity.
    pub fn remaining(&self) -> u64 {
        self.quantity - self.filled_qty
    }

    /// Average fill price, valid iff at least one fill was applied.
    pub fn avg_fill_price(&self) -> Option<f64> {
        (self.filled_qty > 0).then_some(self.avg_price)
    }

    /// Working orders await further fills.
    pub fn is_working(&self) -> bool {
        matches!(self.state, OrderState::Acked | OrderState::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected
        )
    }

    /// New -> Acked.
    pub fn acknowledge(&mut self) -> Result<(), OrderError> {
        self.transition(OrderState::Acked)
    }

    /// New -> Rejected.
    pub fn reject(&mut self) -> Result<(), OrderError> {
        self.transition(OrderState::Rejected)
    }

    /// {Acked, PartiallyFilled} -> Canceled.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition(OrderState::Canceled)
    }

    /// Apply a partial or complete fill.
    ///
    /// Moves Acked -> PartiallyFilled or stays PartiallyFilled; reaching
    /// `filled_qty == quantity` transitions to Filled. The average fill
    /// price is the size-weighted running mean of all applied fills.
    pub fn fill(&mut self, qty: u64, price: f64) -> Result<(), OrderError> {
        if !self.is_working() {
            return Err(OrderError::InvalidTransition {
                from: self.state,
                to: OrderState::Filled,
            });
        }
        if qty == 0 {
            return Err(OrderError::ZeroFill);
        }
        let remaining = self.remaining();
        if qty > remaining {
            return Err(OrderError::Overfill { requested: qty, remaining });
        }

        let filled = self.filled_qty as f64;
        self.avg_price = (self.avg_price * filled + price * qty as f64) / (filled + qty as f64);
        self.filled_qty += qty;

        self.state = if self.filled_qty == self.quantity {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        Ok(())
    }

    fn transition(&mut self, to: OrderState) -> Result<(), OrderError> {
        let legal = matches!(
            (self.state, to),
            (OrderState::New, OrderState::Acked)
                | (OrderState::New, OrderState::Rejected)
                | (OrderState::Acked, OrderState::Canceled)
                | (OrderState::PartiallyFilled, OrderState::Canceled)
        );
        if !legal {
            return Err(OrderError::InvalidTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}
