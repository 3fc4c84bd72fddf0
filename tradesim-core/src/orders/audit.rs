//! Append-only CSV order audit log.
//!
//! One row per lifecycle event. The file survives restarts: opening in
//! append mode only writes the header when the file is new.

use crate::domain::fill::FillReport;
use crate::domain::order::{Order, OrderSide};
use chrono::NaiveDateTime;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

const HEADER: &str =
    "ts,event,client_id,exchange_id,symbol,side,qty,filled_qty,price,fill_price,reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    Sent,
    Acked,
    Partial,
    Filled,
    Canceled,
    Rejected,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Sent => "sent",
            AuditEvent::Acked => "acked",
            AuditEvent::Partial => "partial",
            AuditEvent::Filled => "filled",
            AuditEvent::Canceled => "canceled",
            AuditEvent::Rejected => "rejected",
        }
    }
}

/// CSV-backed audit trail of order lifecycle events.
pub struct OrderAuditLog {
    writer: BufWriter<File>,
}

impl OrderAuditLog {
    /// Open (or create) the log at `path`, appending to existing content.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if is_new {
            writeln!(writer, "{HEADER}")?;
        }
        Ok(Self { writer })
    }

    /// Record one lifecycle event.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        ts: NaiveDateTime,
        event: AuditEvent,
        client_id: u64,
        exchange_id: Option<&str>,
        symbol: &str,
        side: OrderSide,
        qty: u64,
        filled_qty: u64,
        price: f64,
        fill_price: Option<f64>,
        reason: Option<&str>,
    ) -> std::io::Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{:.4},{},{}",
            ts,
            event.as_str(),
            client_id,
            exchange_id.unwrap_or(""),
            symbol,
            side,
            qty,
            filled_qty,
            price,
            fill_price.map(|p| format!("{p:.4}")).unwrap_or_default(),
            reason.unwrap_or(""),
        )?;
        self.writer.flush()
    }

    /// Record an order submission.
    pub fn order_sent(&mut self, ts: NaiveDateTime, order: &Order, price: f64) -> std::io::Result<()> {
        self.record(
            ts,
            AuditEvent::Sent,
            order.id.0,
            None,
            &order.symbol,
            order.side,
            order.quantity,
            order.filled_qty,
            price,
            None,
            None,
        )
    }

    /// Record the outcome of a matching attempt from its fill report.
    pub fn report(&mut self, order: &Order, report: &FillReport, price: f64) -> std::io::Result<()> {
        use crate::domain::fill::FillStatus;
        let event = match report.status {
            FillStatus::Filled => AuditEvent::Filled,
            FillStatus::PartiallyFilled => AuditEvent::Partial,
            FillStatus::Canceled => AuditEvent::Canceled,
            FillStatus::Rejected => AuditEvent::Rejected,
        };
        let reason = report.reason.map(|r| r.as_str());
        self.record(
            report.timestamp,
            event,
            order.id.0,
            None,
            &report.symbol,
            report.side,
            order.quantity,
            order.filled_qty,
            price,
            (report.filled_qty > 0).then_some(report.fill_price),
            reason,
        )
    }
}
