//! Broker contract for the live engine.
//!
//! The engine only ever submits, cancels, and lists positions; fills come
//! back asynchronously as [`FillNotice`] events on the engine mailbox.
//! [`PaperBroker`] closes the loop in-process for paper and dry-run modes.

use crate::domain::ids::OrderId;
use crate::domain::order::Order;
use crate::engine::live::EngineEvent;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accepted,
    Rejected,
}

/// Broker acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_id: String,
    pub status: AckStatus,
    pub message: Option<String>,
}

/// Asynchronous fill notification from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillNotice {
    pub client_order_id: OrderId,
    pub filled_qty: u64,
    pub fill_price: f64,
    pub timestamp: NaiveDateTime,
    /// True when the broker considers the order done after this fill.
    pub terminal: bool,
}

/// Broker-side view of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_entry_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    NotFound,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker rejected the request: {0}")]
    Rejected(String),

    #[error("broker transport failure: {0}")]
    Transport(String),
}

/// Order-routing surface the live engine depends on.
pub trait Broker: Send {
    /// Submit an order. `last_price` is the engine's latest mark for the
    /// symbol, which simulated brokers use as the fill reference. The call
    /// must return within `deadline`; a [`BrokerError::Timeout`] makes the
    /// engine reject the order locally.
    fn submit(
        &mut self,
        order: &Order,
        last_price: f64,
        deadline: Duration,
    ) -> Result<OrderAck, BrokerError>;

    fn cancel(&mut self, exchange_id: &str) -> Result<CancelOutcome, BrokerError>;

    fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
}

/// In-process broker simulator: acknowledges immediately and echoes a full
/// fill at the submitted reference price back through the engine mailbox.
pub struct PaperBroker {
    events: Sender<EngineEvent>,
    next_exchange_id: u64,
    open_exchange_ids: Vec<String>,
}

impl PaperBroker {
    pub fn new(events: Sender<EngineEvent>) -> Self {
        Self { events, next_exchange_id: 1, open_exchange_ids: Vec::new() }
    }
}

impl Broker for PaperBroker {
    fn submit(
        &mut self,
        order: &Order,
        last_price: f64,
        _deadline: Duration,
    ) -> Result<OrderAck, BrokerError> {
        let exchange_id = format!("paper-{}", self.next_exchange_id);
        self.next_exchange_id += 1;
        self.open_exchange_ids.push(exchange_id.clone());

        let notice = FillNotice {
            client_order_id: order.id,
            filled_qty: order.quantity,
            fill_price: last_price,
            timestamp: order.created_at,
            terminal: true,
        };
        self.events
            .send(EngineEvent::BrokerFill(notice))
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(OrderAck { exchange_id, status: AckStatus::Accepted, message: None })
    }

    fn cancel(&mut self, exchange_id: &str) -> Result<CancelOutcome, BrokerError> {
        let before = self.open_exchange_ids.len();
        self.open_exchange_ids.retain(|id| id != exchange_id);
        if self.open_exchange_ids.len() < before {
            Ok(CancelOutcome::Canceled)
        } else {
            Ok(CancelOutcome::NotFound)
        }
    }

    fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        // The paper broker holds no inventory of its own; the engine's
        // ledger is authoritative.
        Ok(Vec::new())
    }
}
