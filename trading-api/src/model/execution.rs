use crate::model::{ids::OrderId, order::OrderSide};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Represents one execution report from the broker.
///
/// Reports are cumulative: `cumulative_quantity` and `average_price` describe
/// the whole order so far, while `shares` and `price` describe only this
/// report's fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// The ID of the order this report corresponds to.
    pub order_id: OrderId,
    pub side: OrderSide,
    /// The quantity filled in this specific report (delta).
    pub shares: u64,
    /// The price at which this fill occurred.
    pub price: f64,
    /// The total quantity filled so far for this order.
    pub cumulative_quantity: u64,
    /// The average price of fills so far.
    pub average_price: f64,
    /// Broker execution time, e.g. "20181231  10:55:33".
    pub time: String,
}

impl Execution {
    pub fn new(order_id: OrderId, side: OrderSide, time: impl Into<String>) -> Self {
        Self {
            order_id,
            side,
            shares: 0,
            price: 0.0,
            cumulative_quantity: 0,
            average_price: 0.0,
            time: time.into(),
        }
    }

    pub fn with_fill(mut self, shares: u64, price: f64, cum_qty: u64, avg_price: f64) -> Self {
        self.shares = shares;
        self.price = price;
        self.cumulative_quantity = cum_qty;
        self.average_price = avg_price;
        self
    }

    /// Parses the broker execution time.
    ///
    /// The broker string carries no offset; the result is the wall time as the
    /// broker printed it. Any trailing zone name is ignored. Returns `None` when
    /// the string is malformed.
    pub fn broker_time(&self) -> Option<NaiveDateTime> {
        parse_broker_time(&self.time)
    }
}

/// Parses "YYYYMMDD  HH:MM:SS" (one or more spaces between date and time).
pub fn parse_broker_time(raw: &str) -> Option<NaiveDateTime> {
    let mut parts = raw.split_whitespace();
    let date = parts.next()?;
    let time = parts.next()?;
    NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y%m%d %H:%M:%S").ok()
}
