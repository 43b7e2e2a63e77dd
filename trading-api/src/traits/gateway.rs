//! Defines the `Gateway` capability.
//!
//! A gateway is the broker's connectivity endpoint. The client treats it as an
//! opaque object: it never sees the wire protocol, only these primitives and
//! two inbound callback slots.
//!
//! Every outbound primitive is expected to return promptly (enqueue and
//! return). Results of requests arrive later through the callbacks, which the
//! gateway invokes synchronously from inside `process_messages`, on whichever
//! thread is pumping.

use crate::error::Result;
use crate::model::{
    contract::Contract,
    execution::Execution,
    ids::{OrderId, SubscriptionId},
    market_data::{Tick, TickType},
    order::OrderRequest,
};

/// Receives execution reports.
pub type OrderStatusHandler = Box<dyn Fn(OrderId, &Contract, &Execution) + Send + Sync>;

/// Receives realtime ticks keyed by the subscription that produced them.
pub type TickHandler = Box<dyn Fn(SubscriptionId, &Tick) + Send + Sync>;

/// A broker session shared between caller threads and one pump thread.
///
/// Implementations synchronise internally; all methods take `&self`.
pub trait Gateway: Send + Sync {
    /// Attempts to open the session. Success is observed through
    /// `is_connected`, not through the return value alone.
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// True once the session has completed its handshake and accepts requests.
    fn is_ready(&self) -> bool;

    /// Pumps one batch of inbound messages, invoking registered handlers.
    fn process_messages(&self) -> Result<()>;

    /// Sends an order and returns the id the gateway assigned to it.
    fn place_order(&self, contract: &Contract, order: &OrderRequest) -> Result<OrderId>;

    fn cancel_order(&self, order_id: OrderId) -> Result<()>;

    /// Opens a realtime stream. `history_depth` is the number of historical
    /// ticks to replay first.
    fn subscribe_ticks(
        &self,
        contract: &Contract,
        tick_type: TickType,
        history_depth: u32,
        snapshot_only: bool,
    ) -> Result<SubscriptionId>;

    fn unsubscribe_ticks(&self, subscription_id: SubscriptionId) -> Result<()>;

    /// Installs the execution report handler, replacing any previous one.
    fn on_order_status(&self, handler: OrderStatusHandler);

    /// Installs the realtime tick handler, replacing any previous one.
    fn on_realtime_tick(&self, handler: TickHandler);
}
