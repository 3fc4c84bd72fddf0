use crate::domain::portfolio::Portfolio;
use crate::domain::signal::Signal;
use crate::sizers::Sizer;

/// Constant share count, optionally capped.
#[derive(Debug, Clone)]
pub struct FixedSizer {
    qty: u64,
    max_qty: Option<u64>,
}

impl FixedSizer {
    pub fn new(qty: u64) -> Self {
        Self { qty, max_qty: None }
    }

    pub fn with_max(qty: u64, max_qty: u64) -> Self {
        Self { qty, max_qty: Some(max_qty) }
    }
}

impl Sizer for FixedSizer {
    fn quantity(&self, _signal: &Signal, _portfolio: &Portfolio, _price: f64) -> u64 {
        match self.max_qty {
            Some(max) => self.qty.min(max),
            None => self.qty,
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
