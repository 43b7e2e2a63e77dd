use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    /// Sell, or sell short when no position is held.
    Sell,
}

impl OrderSide {
    /// The action string the gateway protocol expects.
    pub fn action(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderSpec {
    Market,
    Limit(f64),
}

impl OrderSpec {
    pub fn limit_price(&self) -> Option<f64> {
        match self {
            OrderSpec::Market => None,
            OrderSpec::Limit(price) => Some(*price),
        }
    }
}

/// An instruction sent to the gateway to buy or sell a contract.
///
/// Quantity is always a magnitude; the direction lives in `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    action: OrderSide,
    total_quantity: u64,
    spec: OrderSpec,
}

impl OrderRequest {
    pub fn new(action: OrderSide, total_quantity: u64, spec: OrderSpec) -> Self {
        Self {
            action,
            total_quantity,
            spec,
        }
    }

    pub fn market(action: OrderSide, total_quantity: u64) -> Self {
        Self::new(action, total_quantity, OrderSpec::Market)
    }

    pub fn limit(action: OrderSide, total_quantity: u64, limit_price: f64) -> Self {
        Self::new(action, total_quantity, OrderSpec::Limit(limit_price))
    }

    pub fn action(&self) -> OrderSide {
        self.action
    }

    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    pub fn spec(&self) -> OrderSpec {
        self.spec
    }
}
