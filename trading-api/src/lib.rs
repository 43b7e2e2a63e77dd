//! # Trading API
//!
//! Shared vocabulary between the broker client core, the gateway adapters and
//! the algorithm collaborators.
//!
//! ## Modules
//! - `model`: Instruments, contracts, ticks, executions and order requests.
//! - `traits`: The `Gateway` capability every broker adapter implements.
//! - `error`: Failures a gateway primitive can report.

pub mod error;
pub mod model;
pub mod traits;

pub use error::GatewayError;
pub use model::contract::{Contract, ContractDefaults};
pub use model::execution::Execution;
pub use model::ids::{OrderId, SubscriberHandle, SubscriptionId};
pub use model::instrument::Instrument;
pub use model::market_data::{Tick, TickAttributes, TickType};
pub use model::order::{OrderRequest, OrderSide, OrderSpec};
pub use traits::gateway::{Gateway, OrderStatusHandler, TickHandler};

pub mod prelude {
    pub use crate::model::execution::Execution;
    pub use crate::model::instrument::Instrument;
    pub use crate::model::market_data::Tick;
    pub use crate::model::order::{OrderSide, OrderSpec};
}
