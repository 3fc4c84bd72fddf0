use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-assigned order id, unique within one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Sequential id generator. Sequential ids keep runs reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdGen {
    next_order: u64,
}

impl Default for IdGen {
    fn default() -> Self {
        Self { next_order: 1 }
    }
}

impl IdGen {
    pub fn next_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order);
        self.next_order += 1;
        id
    }
}
