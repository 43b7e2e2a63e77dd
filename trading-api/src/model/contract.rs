//! Broker contract descriptions.
//!
//! The gateway does not know about `Instrument`s; every request carries a full
//! `Contract`. Building one is a pure function of the instrument and a fixed set
//! of market defaults.

use crate::model::instrument::Instrument;
use serde::{Deserialize, Serialize};

/// Market routing attributes applied to every contract built by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractDefaults {
    /// Security type (e.g., "STK").
    pub sec_type: String,
    /// Trading currency (e.g., "USD").
    pub currency: String,
    /// Routing destination (e.g., "SMART").
    pub exchange: String,
    /// Listing exchange. Disambiguates symbols that are listed in several
    /// places (MSFT is also listed on "AEB").
    pub primary_exchange: String,
}

impl Default for ContractDefaults {
    fn default() -> Self {
        Self {
            sec_type: "STK".to_string(),
            currency: "USD".to_string(),
            exchange: "SMART".to_string(),
            primary_exchange: "ISLAND".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub sec_type: String,
    pub currency: String,
    pub exchange: String,
    pub primary_exchange: String,
}

impl Contract {
    /// Builds the contract for `instrument` using the given market defaults.
    pub fn from_instrument(instrument: &Instrument, defaults: &ContractDefaults) -> Self {
        Self {
            symbol: instrument.symbol().to_string(),
            sec_type: defaults.sec_type.clone(),
            currency: defaults.currency.clone(),
            exchange: defaults.exchange.clone(),
            primary_exchange: defaults.primary_exchange.clone(),
        }
    }

    /// A US stock routed through SMART with ISLAND as primary exchange.
    pub fn us_stock(symbol: impl Into<String>) -> Self {
        Self::from_instrument(&Instrument::new(symbol), &ContractDefaults::default())
    }

    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.symbol.as_str())
    }
}
