//! Connection bootstrap and message pump.
//!
//! The `ConnectionManager` owns the only background thread of the client. That
//! thread first runs a bounded connect loop. If the gateway connects within
//! budget it installs the inbound handlers and turns into the message pump for
//! the rest of the session. If the budget runs out the manager parks in
//! `ConnectionState::Failed` and never retries.

use crate::config::ClientConfig;
use crate::error::Result;
use log::{error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use trading::Gateway;

/// Longest stretch the connect loop sleeps without looking at the stop flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Bootstrap in progress.
    Connecting,
    /// Handlers installed, pump running.
    Ready,
    /// Attempt budget exhausted. Terminal.
    Failed,
    /// Pump ended, either on shutdown or because the gateway dropped the session.
    Disconnected,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Ready,
            2 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Ready => 1,
            ConnectionState::Failed => 2,
            ConnectionState::Disconnected => 3,
        }
    }
}

/// Observable connection state shared with the pump thread.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Parameters of the bootstrap and pump loops, extracted from `ClientConfig`.
#[derive(Debug, Clone)]
struct Settings {
    host: String,
    port: u16,
    client_id: i32,
    max_attempts: u32,
    retry_delay: Duration,
    pump_interval: Duration,
}

impl From<&ClientConfig> for Settings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            host: config.host().to_string(),
            port: config.port(),
            client_id: config.client_id(),
            max_attempts: config.max_connect_attempts(),
            retry_delay: config.connect_retry_delay(),
            pump_interval: config.pump_interval(),
        }
    }
}

enum Bootstrap {
    Connected,
    Cancelled,
    Exhausted,
}

pub struct ConnectionManager {
    gateway: Arc<dyn Gateway>,
    state: StateCell,
    cancel: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawns the connection thread and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `gateway` - The session to drive.
    /// * `config` - Endpoint, retry budget and pump interval.
    /// * `on_connected` - Runs once on the connection thread after the gateway
    ///   connects and before the state becomes `Ready`. Used to install the
    ///   inbound handlers.
    ///
    /// # Returns
    ///
    /// * `Err(ClientError::Io)` if the thread cannot be spawned.
    pub fn start<F>(
        gateway: Arc<dyn Gateway>,
        config: &ClientConfig,
        on_connected: F,
    ) -> Result<Self>
    where
        F: FnOnce(&dyn Gateway) + Send + 'static,
    {
        let settings = Settings::from(config);
        let state = StateCell::new(ConnectionState::Connecting);
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let gateway = Arc::clone(&gateway);
            let state = state.clone();
            let cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name("broker-pump".to_string())
                .spawn(move || run(gateway, settings, state, cancel, on_connected))?
        };

        Ok(Self {
            gateway,
            state,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Stops the thread, waits for it, then disconnects if still connected.
    ///
    /// Idempotent. Once this returns no handler is running on the pump thread.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Release);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                // Dropped from inside a handler; the loop sees the flag on return.
                warn!("[ConnectionManager] stop requested from the pump thread itself");
            } else if worker.join().is_err() {
                error!("[ConnectionManager] pump thread panicked");
            }
        }

        if self.gateway.is_connected() {
            info!("[ConnectionManager] Disconnecting from gateway");
            self.gateway.disconnect();
        }

        if self.state.get() != ConnectionState::Failed {
            self.state.set(ConnectionState::Disconnected);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(
    gateway: Arc<dyn Gateway>,
    settings: Settings,
    state: StateCell,
    cancel: Arc<AtomicBool>,
    on_connected: F,
) where
    F: FnOnce(&dyn Gateway),
{
    match bootstrap(gateway.as_ref(), &settings, &cancel) {
        Bootstrap::Connected => {
            on_connected(gateway.as_ref());
            state.set(ConnectionState::Ready);
            info!("[ConnectionManager] Connected. Message processing started...");
            let pumped = panic::catch_unwind(AssertUnwindSafe(|| {
                pump(gateway.as_ref(), &settings, &cancel)
            }));
            if pumped.is_err() {
                error!("[ConnectionManager] Message processing panicked. Pump stopped");
            }
            state.set(ConnectionState::Disconnected);
        }
        Bootstrap::Cancelled => {
            info!("[ConnectionManager] Bootstrap cancelled");
            state.set(ConnectionState::Disconnected);
        }
        Bootstrap::Exhausted => {
            error!(
                "[ConnectionManager] Reached maximum number of attempts ({}) to connect to {}:{}",
                settings.max_attempts, settings.host, settings.port
            );
            state.set(ConnectionState::Failed);
        }
    }
}

fn bootstrap(gateway: &dyn Gateway, settings: &Settings, cancel: &AtomicBool) -> Bootstrap {
    for attempt in 1..=settings.max_attempts {
        if cancel.load(Ordering::Acquire) {
            return Bootstrap::Cancelled;
        }
        if gateway.is_connected() {
            return Bootstrap::Connected;
        }

        info!(
            "[ConnectionManager] Connect attempt {} of {} to {}:{} (client {})",
            attempt, settings.max_attempts, settings.host, settings.port, settings.client_id
        );
        if let Err(e) = gateway.connect(&settings.host, settings.port, settings.client_id) {
            warn!("[ConnectionManager] Connect attempt {} failed: {}", attempt, e);
        }
        if gateway.is_connected() {
            return Bootstrap::Connected;
        }

        if attempt < settings.max_attempts && !sleep_unless_cancelled(settings.retry_delay, cancel)
        {
            return Bootstrap::Cancelled;
        }
    }

    if cancel.load(Ordering::Acquire) {
        Bootstrap::Cancelled
    } else {
        Bootstrap::Exhausted
    }
}

fn pump(gateway: &dyn Gateway, settings: &Settings, cancel: &AtomicBool) {
    while gateway.is_connected() && !cancel.load(Ordering::Acquire) {
        if let Err(e) = gateway.process_messages() {
            warn!("[ConnectionManager] Failed to process gateway messages: {}", e);
        }
        thread::sleep(settings.pump_interval);
    }

    if cancel.load(Ordering::Acquire) {
        info!("[ConnectionManager] Message processing stopped");
    } else {
        warn!("[ConnectionManager] Gateway connection lost. Message processing stopped");
    }
}

/// Sleeps for `total`, waking early if `cancel` is raised.
///
/// Returns `false` if the sleep was cut short.
fn sleep_unless_cancelled(total: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
