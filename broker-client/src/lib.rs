//! # Broker Client
//!
//! Lets many trading algorithms in one process share a single broker gateway
//! session.
//!
//! ## Modules
//! - `client`: The `BrokerClient` facade algorithms talk to.
//! - `connection`: Connect bootstrap with retries and the message pump thread.
//! - `ticks`: Per-instrument stream deduplication and tick fan-out.
//! - `orders`: Order registration and all-or-none fill notification.
//! - `global`: The lazily built process-wide client.
//! - `recorder`: Writes a symbol's tick stream to disk.
//! - `config`: Layered configuration (file and `BROKER_` environment).

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod global;
pub mod orders;
pub mod recorder;
pub mod ticks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::BrokerClient;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use error::{ClientError, Result};
pub use orders::{FillCallback, FillNotification, OrderRegistry};
pub use recorder::TickRecorder;
pub use ticks::TickRegistry;
