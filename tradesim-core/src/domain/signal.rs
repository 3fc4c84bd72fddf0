//! Strategy signals as a closed sum type with strongly-typed payloads.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Signal action. HOLD is inert: the engine drops it before sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// One strategy emission for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub symbol: String,
    /// Reference price at emission time.
    pub price: f64,
    pub timestamp: NaiveDateTime,
    /// Optional absolute stop level; feeds risk-based sizing and an
    /// absolute-price stop on the resulting position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    /// Optional ATR observed by the strategy, for volatility sizing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Signal {
    pub fn new(
        action: SignalAction,
        symbol: impl Into<String>,
        price: f64,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            price,
            timestamp,
            stop_loss: None,
            take_profit: None,
            atr: None,
            confidence: None,
        }
    }

    pub fn buy(symbol: impl Into<String>, price: f64, timestamp: NaiveDateTime) -> Self {
        Self::new(SignalAction::Buy, symbol, price, timestamp)
    }

    pub fn sell(symbol: impl Into<String>, price: f64, timestamp: NaiveDateTime) -> Self {
        Self::new(SignalAction::Sell, symbol, price, timestamp)
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }
}
