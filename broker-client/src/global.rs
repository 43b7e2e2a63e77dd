//! Process-wide client instance.
//!
//! Built lazily on first access and torn down exactly once. After `shutdown`
//! the slot stays closed: `client_or_init` never builds a second client.
//! Collaborators should receive the returned `Arc<BrokerClient>` explicitly
//! rather than calling back into this module.

use crate::client::BrokerClient;
use crate::error::{ClientError, Result};
use lazy_static::lazy_static;
use log::info;
use std::sync::{Arc, Mutex, MutexGuard};

enum Slot {
    Empty,
    Live(Arc<BrokerClient>),
    ShutDown,
}

lazy_static! {
    static ref GLOBAL_CLIENT: Mutex<Slot> = Mutex::new(Slot::Empty);
}

fn slot() -> MutexGuard<'static, Slot> {
    GLOBAL_CLIENT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns the process-wide client, building it with `init` on first use.
///
/// `init` runs under the slot lock, so concurrent first callers build one
/// client between them. A failed `init` leaves the slot empty.
pub fn client_or_init<F>(init: F) -> Result<Arc<BrokerClient>>
where
    F: FnOnce() -> Result<BrokerClient>,
{
    let mut slot = slot();
    match &*slot {
        Slot::Live(client) => Ok(Arc::clone(client)),
        Slot::ShutDown => Err(ClientError::ShutDown),
        Slot::Empty => {
            let client = Arc::new(init()?);
            *slot = Slot::Live(Arc::clone(&client));
            Ok(client)
        }
    }
}

/// The process-wide client, if it has been built and not torn down.
pub fn get() -> Option<Arc<BrokerClient>> {
    match &*slot() {
        Slot::Live(client) => Some(Arc::clone(client)),
        Slot::Empty | Slot::ShutDown => None,
    }
}

/// Tears the process-wide client down. Later calls are no-ops.
///
/// The client is stopped here even if collaborators still hold clones of
/// the `Arc`; their requests then fail with `NotReady`.
pub fn shutdown() {
    let previous = std::mem::replace(&mut *slot(), Slot::ShutDown);
    if let Slot::Live(client) = previous {
        info!("Shutting down process-wide broker client");
        client.shutdown();
    }
}
