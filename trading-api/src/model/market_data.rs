//! Market Data models.
//!
//! Includes `Tick` for individual trade prints delivered on a realtime stream
//! and `TickType` for selecting which stream the gateway should open.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of tick-by-tick stream requested from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TickType {
    /// Last trade prints on the primary venue only.
    Last,
    /// Every trade print, including combos and odd lots.
    #[default]
    AllLast,
    /// Best bid and ask updates.
    BidAsk,
    /// Midpoint updates.
    MidPoint,
}

impl TickType {
    /// The name the gateway protocol uses for this stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            TickType::Last => "Last",
            TickType::AllLast => "AllLast",
            TickType::BidAsk => "BidAsk",
            TickType::MidPoint => "MidPoint",
        }
    }
}

impl fmt::Display for TickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition flags attached to a trade print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickAttributes {
    pub can_auto_execute: bool,
    pub past_limit: bool,
    pub pre_open: bool,
    pub unreported: bool,
    pub bid_past_low: bool,
    pub ask_past_high: bool,
}

/// Immutable snapshot of one realtime market-data event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Stream the tick was produced by.
    pub tick_type: TickType,
    /// Exchange time of the print (Unix timestamp, seconds).
    pub time: i64,
    /// Trade price.
    pub price: f64,
    /// Trade size in shares.
    pub size: u64,
    /// Venue that reported the print.
    pub exchange: String,
    pub attributes: TickAttributes,
}

impl Tick {
    /// Creates a new Tick with no condition flags set.
    pub fn new(
        tick_type: TickType,
        time: i64,
        price: f64,
        size: u64,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            tick_type,
            time,
            price,
            size,
            exchange: exchange.into(),
            attributes: TickAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: TickAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn get_price(&self) -> f64 {
        self.price
    }

    pub fn get_size(&self) -> u64 {
        self.size
    }

    pub fn get_time(&self) -> i64 {
        self.time
    }
}
