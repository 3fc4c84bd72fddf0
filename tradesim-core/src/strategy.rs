//! Strategy contract.
//!
//! Strategies are deterministic functions of the snapshot and their own
//! prior history; they never mutate engine state. Real strategies live
//! outside this crate — the built-ins here exist for wiring and tests.

use crate::domain::signal::Signal;
use crate::domain::snapshot::MarketSnapshot;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

pub trait Strategy: Send {
    /// Emit zero or more signals for this tick.
    fn generate_signals(&mut self, snapshot: &MarketSnapshot) -> Vec<Signal>;

    fn name(&self) -> &'static str {
        "strategy"
    }
}

/// Emits nothing, ever.
#[derive(Debug, Default)]
pub struct NullStrategy;

impl Strategy for NullStrategy {
    fn generate_signals(&mut self, _snapshot: &MarketSnapshot) -> Vec<Signal> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Replays a fixed timestamp -> signals script. Deterministic by
/// construction; the workhorse of engine tests and replay demos.
#[derive(Debug, Default)]
pub struct ScriptedStrategy {
    script: BTreeMap<NaiveDateTime, Vec<Signal>>,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, timestamp: NaiveDateTime, signal: Signal) -> Self {
        self.script.entry(timestamp).or_default().push(signal);
        self
    }
}

impl Strategy for ScriptedStrategy {
    fn generate_signals(&mut self, snapshot: &MarketSnapshot) -> Vec<Signal> {
        self.script.get(&snapshot.timestamp).cloned().unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
