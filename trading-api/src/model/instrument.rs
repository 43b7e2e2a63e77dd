//! Defines the tradable instrument key.
//!
//! An `Instrument` is only a symbol. Market routing attributes (currency,
//! exchange, primary exchange) are not part of its identity; they are applied
//! when a `Contract` is built from it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument {
    /// The human-readable ticker symbol (e.g., "AAPL").
    symbol: String,
}

impl Instrument {
    /// Creates a new Instrument.
    ///
    /// The symbol is trimmed and upper-cased so that "aapl " and "AAPL" key
    /// the same subscription.
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol: String = symbol.into();
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl From<&str> for Instrument {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_is_normalized() {
        assert_eq!(Instrument::new(" aapl "), Instrument::new("AAPL"));
        assert_eq!(Instrument::from("msft").symbol(), "MSFT");
    }
}
