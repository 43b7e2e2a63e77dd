pub mod contract;
pub mod execution;
pub mod ids;
pub mod instrument;
pub mod market_data;
pub mod order;

pub use contract::{Contract, ContractDefaults};
pub use execution::Execution;
pub use ids::{OrderId, SubscriberHandle, SubscriptionId};
pub use instrument::Instrument;
pub use market_data::{Tick, TickAttributes, TickType};
pub use order::{OrderRequest, OrderSide, OrderSpec};
