//! Deterministic execution simulation.

pub mod matching;

pub use matching::{FillAt, MatchConfig, MatchingEngine};
