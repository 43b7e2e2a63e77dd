//! The broker client facade.
//!
//! `BrokerClient` is the only entry point algorithms use. It owns the gateway
//! session, the connection thread and the two registries. Ticks are guarded
//! by one lock and orders by another; no code path holds both.

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, StateCell};
use crate::error::{ClientError, Result};
use crate::orders::{FillNotification, OrderRegistry};
use crate::ticks::TickRegistry;
use log::info;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use trading::{
    Contract, Execution, Gateway, Instrument, OrderId, OrderSide, OrderSpec, SubscriberHandle,
    SubscriptionId, Tick,
};

const READY_POLL: Duration = Duration::from_millis(5);

pub struct BrokerClient {
    gateway: Arc<dyn Gateway>,
    ticks: Arc<TickRegistry>,
    orders: Arc<OrderRegistry>,
    connection: ConnectionManager,
    state: StateCell,
}

impl BrokerClient {
    /// Creates the client and starts connecting in the background.
    ///
    /// Returns as soon as the connection thread is running. Use `is_ready` or
    /// `wait_until_ready` to learn when requests will be accepted.
    pub fn connect(gateway: Arc<dyn Gateway>, config: ClientConfig) -> Result<Self> {
        let ticks = Arc::new(TickRegistry::new(
            config.contract_defaults().clone(),
            config.tick_type(),
        ));
        let orders = Arc::new(OrderRegistry::new(config.contract_defaults().clone()));

        let install_handlers = {
            let ticks = Arc::clone(&ticks);
            let orders = Arc::clone(&orders);
            move |gateway: &dyn Gateway| {
                gateway.on_order_status(Box::new(
                    move |order_id: OrderId, _contract: &Contract, execution: &Execution| {
                        orders.on_execution(order_id, execution)
                    },
                ));
                gateway.on_realtime_tick(Box::new(
                    move |subscription_id: SubscriptionId, tick: &Tick| {
                        ticks.dispatch(subscription_id, tick)
                    },
                ));
            }
        };

        info!(
            "Initializing broker client for {}:{} (client {})",
            config.host(),
            config.port(),
            config.client_id()
        );
        let connection = ConnectionManager::start(Arc::clone(&gateway), &config, install_handlers)?;
        let state = connection.state_cell();

        Ok(Self {
            gateway,
            ticks,
            orders,
            connection,
            state,
        })
    }

    /// True while the session is up and accepting requests.
    pub fn is_ready(&self) -> bool {
        self.state.get() == ConnectionState::Ready && self.gateway.is_ready()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Blocks until the client is ready, the bootstrap fails, or `timeout`
    /// elapses. Returns `is_ready()`.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return true;
            }
            match self.state() {
                ConnectionState::Failed | ConnectionState::Disconnected => return false,
                ConnectionState::Connecting | ConnectionState::Ready => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(READY_POLL);
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ClientError::NotReady)
        }
    }

    /// Buys `quantity` shares at market.
    ///
    /// `on_fill` runs once, on the pump thread, when the whole quantity has
    /// executed. The sign of `quantity` is ignored.
    pub fn long_market<F>(
        &self,
        instrument: &Instrument,
        quantity: i64,
        on_fill: F,
    ) -> Result<OrderId>
    where
        F: FnOnce(FillNotification) + Send + 'static,
    {
        self.place(instrument, OrderSide::Buy, quantity, OrderSpec::Market, on_fill)
    }

    pub fn long_limit<F>(
        &self,
        instrument: &Instrument,
        limit_price: f64,
        quantity: i64,
        on_fill: F,
    ) -> Result<OrderId>
    where
        F: FnOnce(FillNotification) + Send + 'static,
    {
        let spec = limit_spec(limit_price)?;
        self.place(instrument, OrderSide::Buy, quantity, spec, on_fill)
    }

    /// Sells `quantity` shares short at market.
    pub fn short_market<F>(
        &self,
        instrument: &Instrument,
        quantity: i64,
        on_fill: F,
    ) -> Result<OrderId>
    where
        F: FnOnce(FillNotification) + Send + 'static,
    {
        self.place(instrument, OrderSide::Sell, quantity, OrderSpec::Market, on_fill)
    }

    pub fn short_limit<F>(
        &self,
        instrument: &Instrument,
        limit_price: f64,
        quantity: i64,
        on_fill: F,
    ) -> Result<OrderId>
    where
        F: FnOnce(FillNotification) + Send + 'static,
    {
        let spec = limit_spec(limit_price)?;
        self.place(instrument, OrderSide::Sell, quantity, spec, on_fill)
    }

    fn place<F>(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        quantity: i64,
        spec: OrderSpec,
        on_fill: F,
    ) -> Result<OrderId>
    where
        F: FnOnce(FillNotification) + Send + 'static,
    {
        self.ensure_ready()?;
        let quantity = quantity.unsigned_abs();
        if quantity == 0 {
            return Err(ClientError::InvalidQuantity);
        }
        self.orders.place(
            self.gateway.as_ref(),
            instrument,
            side,
            quantity,
            spec,
            Box::new(on_fill),
        )
    }

    /// Requests cancellation of an order this client is monitoring.
    ///
    /// Unknown ids are ignored. The fill callback stays registered until the
    /// caller unregisters it.
    pub fn cancel_order(&self, order_id: OrderId) {
        self.orders.cancel(self.gateway.as_ref(), order_id);
    }

    /// Closes the position opened by `order_id` by cancelling it if still working.
    pub fn close_position(&self, order_id: OrderId) {
        self.cancel_order(order_id);
    }

    pub fn unregister_fill_callback(&self, order_id: OrderId) {
        self.orders.unregister(order_id);
    }

    /// Streams realtime ticks of `instrument` into `callback`.
    ///
    /// The callback runs on a delivery thread dedicated to this subscriber and
    /// sees every tick once, in arrival order. Keep the returned handle to
    /// cancel.
    pub fn request_ticks<F>(&self, instrument: &Instrument, callback: F) -> Result<SubscriberHandle>
    where
        F: FnMut(&Tick) + Send + 'static,
    {
        self.ensure_ready()?;
        self.ticks
            .subscribe(self.gateway.as_ref(), instrument, callback)
    }

    pub fn cancel_ticks(&self, instrument: &Instrument, handle: SubscriberHandle) {
        self.ticks
            .cancel(self.gateway.as_ref(), instrument, handle);
    }

    pub fn tick_registry(&self) -> &TickRegistry {
        &self.ticks
    }

    pub fn order_registry(&self) -> &OrderRegistry {
        &self.orders
    }

    /// Stops the pump, disconnects, and drains every tick mailbox.
    ///
    /// Idempotent; also run on drop. After it returns no callback of this
    /// client is running.
    pub fn shutdown(&self) {
        self.connection.stop();
        self.ticks.shutdown();
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn limit_spec(limit_price: f64) -> Result<OrderSpec> {
    if limit_price.is_finite() && limit_price > 0.0 {
        Ok(OrderSpec::Limit(limit_price))
    } else {
        Err(ClientError::InvalidPrice(limit_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGateway;

    fn ready_client(gateway: Arc<ScriptedGateway>) -> BrokerClient {
        let config = ClientConfig::default()
            .with_connect_policy(3, Duration::from_millis(1))
            .with_pump_interval(Duration::from_millis(1));
        let client = BrokerClient::connect(gateway, config).unwrap();
        assert!(client.wait_until_ready(Duration::from_secs(5)));
        client
    }

    #[test]
    fn test_handlers_installed_before_ready() {
        let gateway = Arc::new(ScriptedGateway::new());
        let _client = ready_client(gateway.clone());
        assert!(gateway.has_handlers());
    }

    #[test]
    fn test_quantity_sign_is_normalised() {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ready_client(gateway.clone());
        let aapl = Instrument::new("AAPL");

        client.short_market(&aapl, -30, |_| {}).unwrap();
        client.long_limit(&aapl, 10.0, -5, |_| {}).unwrap();

        let placed = gateway.placed_orders();
        assert_eq!(placed[0].2.action(), OrderSide::Sell);
        assert_eq!(placed[0].2.total_quantity(), 30);
        assert_eq!(placed[1].2.action(), OrderSide::Buy);
        assert_eq!(placed[1].2.total_quantity(), 5);
        assert_eq!(placed[1].2.spec(), OrderSpec::Limit(10.0));
    }

    #[test]
    fn test_invalid_orders_never_reach_gateway() {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ready_client(gateway.clone());
        let aapl = Instrument::new("AAPL");

        assert!(matches!(
            client.long_market(&aapl, 0, |_| {}),
            Err(ClientError::InvalidQuantity)
        ));
        assert!(matches!(
            client.short_limit(&aapl, f64::NAN, 10, |_| {}),
            Err(ClientError::InvalidPrice(_))
        ));
        assert!(matches!(
            client.long_limit(&aapl, -1.0, 10, |_| {}),
            Err(ClientError::InvalidPrice(_))
        ));
        assert_eq!(gateway.request_count(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ready_client(gateway.clone());
        client.shutdown();
        client.shutdown();
        assert!(!client.is_ready());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.request_ticks(&Instrument::new("AAPL"), |_| {}),
            Err(ClientError::NotReady)
        ));
    }
}
