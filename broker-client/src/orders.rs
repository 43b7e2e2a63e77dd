//! Order registry and fill matching.
//!
//! Every order placed through the client is registered with exactly one fill
//! callback. Fills are all-or-none: execution reports are cumulative, and the
//! callback fires only for the report whose cumulative quantity equals the
//! requested quantity. Partial fills produce no event.

use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use trading::{
    Contract, ContractDefaults, Execution, Gateway, Instrument, OrderId, OrderRequest, OrderSide,
    OrderSpec,
};

/// Delivered once when an order has filled in full.
#[derive(Debug, Clone, PartialEq)]
pub struct FillNotification {
    pub order_id: OrderId,
    pub average_price: f64,
    /// Local clock at the time the final report was processed.
    pub filled_at: DateTime<Utc>,
    /// Broker execution time as printed by the broker, without zone translation.
    pub broker_time: Option<NaiveDateTime>,
}

pub type FillCallback = Box<dyn FnOnce(FillNotification) + Send>;

struct PendingOrder {
    instrument: Instrument,
    side: OrderSide,
    quantity: u64,
    on_fill: FillCallback,
}

pub struct OrderRegistry {
    orders: Mutex<HashMap<OrderId, PendingOrder>>,
    contract_defaults: ContractDefaults,
}

impl OrderRegistry {
    pub fn new(contract_defaults: ContractDefaults) -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            contract_defaults,
        }
    }

    fn orders(&self) -> MutexGuard<'_, HashMap<OrderId, PendingOrder>> {
        self.orders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sends an order to the gateway and registers its fill callback.
    ///
    /// The order lock is taken before the gateway call and released after the
    /// callback is stored. Execution reports are matched under the same lock,
    /// so a report racing the placement waits until the order is registered.
    ///
    /// # Arguments
    ///
    /// * `quantity` - Share count, already normalised to a magnitude.
    pub fn place(
        &self,
        gateway: &dyn Gateway,
        instrument: &Instrument,
        side: OrderSide,
        quantity: u64,
        spec: OrderSpec,
        on_fill: FillCallback,
    ) -> Result<OrderId> {
        let contract = Contract::from_instrument(instrument, &self.contract_defaults);
        let request = OrderRequest::new(side, quantity, spec);

        let mut orders = self.orders();
        let order_id = gateway.place_order(&contract, &request)?;
        let pending = PendingOrder {
            instrument: instrument.clone(),
            side,
            quantity,
            on_fill,
        };
        if orders.insert(order_id, pending).is_some() {
            warn!("Gateway reused order id {}; previous callback dropped", order_id);
        }
        debug!(
            "Placed order {}: {} {} {} ({:?})",
            order_id, side, quantity, instrument, spec
        );
        Ok(order_id)
    }

    /// Asks the gateway to cancel a monitored order.
    ///
    /// Orders that are not registered are ignored. The registration is kept:
    /// the gateway may still report a fill that raced the cancel.
    pub fn cancel(&self, gateway: &dyn Gateway, order_id: OrderId) {
        let orders = self.orders();
        if !orders.contains_key(&order_id) {
            return;
        }
        if let Err(e) = gateway.cancel_order(order_id) {
            warn!("Failed to cancel order {}: {}", order_id, e);
        }
    }

    /// Drops the fill callback of `order_id` without contacting the gateway.
    pub fn unregister(&self, order_id: OrderId) {
        if self.orders().remove(&order_id).is_some() {
            debug!("Unregistered fill callback of order {}", order_id);
        }
    }

    /// Matches an execution report against its order.
    ///
    /// Called from the pump thread only. A full fill removes the order and
    /// runs its callback after the lock is released. Reports for orders that
    /// are no longer registered are expected (the caller unregistered) and
    /// ignored.
    pub fn on_execution(&self, order_id: OrderId, execution: &Execution) {
        let filled = {
            let mut orders = self.orders();
            let Some(order) = orders.get(&order_id) else {
                trace!("Ignoring execution for unmonitored order {}", order_id);
                return;
            };

            let requested = order.quantity;
            if execution.cumulative_quantity == requested {
                orders.remove(&order_id)
            } else {
                if execution.cumulative_quantity > requested {
                    warn!(
                        "Order {} reports {} filled of {} requested",
                        order_id, execution.cumulative_quantity, requested
                    );
                } else {
                    trace!(
                        "Order {} partially filled: {}/{}",
                        order_id,
                        execution.cumulative_quantity,
                        requested
                    );
                }
                None
            }
        };

        let Some(order) = filled else {
            return;
        };

        let notification = FillNotification {
            order_id,
            average_price: execution.average_price,
            filled_at: Utc::now(),
            broker_time: execution.broker_time(),
        };
        debug!(
            "Order {} filled: {} {} {} @ {}",
            order_id, order.side, order.quantity, order.instrument, notification.average_price
        );

        let on_fill = order.on_fill;
        if panic::catch_unwind(AssertUnwindSafe(move || on_fill(notification))).is_err() {
            error!("Fill callback of order {} panicked", order_id);
        }
    }

    pub fn is_registered(&self, order_id: OrderId) -> bool {
        self.orders().contains_key(&order_id)
    }

    pub fn len(&self) -> usize {
        self.orders().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGateway;
    use std::sync::mpsc;

    fn registry() -> OrderRegistry {
        OrderRegistry::new(ContractDefaults::default())
    }

    fn report(order_id: OrderId, cumulative: u64, avg_price: f64) -> Execution {
        Execution::new(order_id, OrderSide::Buy, "20240102  09:31:00")
            .with_fill(cumulative, avg_price, cumulative, avg_price)
    }

    fn channel_callback() -> (FillCallback, mpsc::Receiver<FillNotification>) {
        let (tx, rx) = mpsc::channel();
        let callback: FillCallback = Box::new(move |fill: FillNotification| {
            tx.send(fill).unwrap();
        });
        (callback, rx)
    }

    #[test]
    fn test_place_sends_normalised_request() {
        let gateway = ScriptedGateway::new().with_first_order_id(100);
        let registry = registry();

        let id = registry
            .place(
                &gateway,
                &Instrument::new("AAPL"),
                OrderSide::Sell,
                25,
                OrderSpec::Limit(190.5),
                Box::new(|_: FillNotification| {}),
            )
            .unwrap();

        assert_eq!(id, OrderId::new(100));
        assert!(registry.is_registered(id));
        let (placed_id, contract, request) = gateway.placed_orders().remove(0);
        assert_eq!(placed_id, id);
        assert_eq!(contract, Contract::us_stock("AAPL"));
        assert_eq!(request, OrderRequest::limit(OrderSide::Sell, 25, 190.5));
    }

    #[test]
    fn test_partial_fills_are_absorbed() {
        let gateway = ScriptedGateway::new();
        let registry = registry();
        let (callback, rx) = channel_callback();
        let id = registry
            .place(
                &gateway,
                &Instrument::new("AAPL"),
                OrderSide::Buy,
                100,
                OrderSpec::Market,
                callback,
            )
            .unwrap();

        registry.on_execution(id, &report(id, 40, 10.0));
        registry.on_execution(id, &report(id, 99, 10.1));
        assert!(rx.try_recv().is_err());
        assert!(registry.is_registered(id));

        registry.on_execution(id, &report(id, 100, 10.2));
        let fill = rx.try_recv().expect("full fill notifies");
        assert_eq!(fill.order_id, id);
        assert_eq!(fill.average_price, 10.2);
        assert!(fill.broker_time.is_some());
        assert!(!registry.is_registered(id));

        // A duplicate final report cannot fire twice.
        registry.on_execution(id, &report(id, 100, 10.2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unregistered_order_is_ignored() {
        let gateway = ScriptedGateway::new();
        let registry = registry();
        let (callback, rx) = channel_callback();
        let id = registry
            .place(
                &gateway,
                &Instrument::new("AAPL"),
                OrderSide::Buy,
                10,
                OrderSpec::Market,
                callback,
            )
            .unwrap();

        registry.unregister(id);
        registry.on_execution(id, &report(id, 10, 5.0));
        registry.on_execution(OrderId::new(12345), &report(OrderId::new(12345), 1, 1.0));
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_only_monitored_orders() {
        let gateway = ScriptedGateway::new();
        let registry = registry();
        let id = registry
            .place(
                &gateway,
                &Instrument::new("AAPL"),
                OrderSide::Buy,
                10,
                OrderSpec::Market,
                Box::new(|_: FillNotification| {}),
            )
            .unwrap();

        registry.cancel(&gateway, OrderId::new(9999));
        assert!(gateway.cancelled_orders().is_empty());

        registry.cancel(&gateway, id);
        assert_eq!(gateway.cancelled_orders(), vec![id]);
        assert!(registry.is_registered(id), "cancel keeps the registration");
    }

    #[test]
    fn test_rejected_placement_registers_nothing() {
        let gateway = ScriptedGateway::new().rejecting_orders();
        let registry = registry();
        let result = registry.place(
            &gateway,
            &Instrument::new("AAPL"),
            OrderSide::Buy,
            10,
            OrderSpec::Market,
            Box::new(|_: FillNotification| {}),
        );
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fill_callback_may_place_follow_up() {
        let gateway = std::sync::Arc::new(ScriptedGateway::new());
        let registry = std::sync::Arc::new(registry());
        let (tx, rx) = mpsc::channel();

        let follow_up: FillCallback = {
            let gateway = gateway.clone();
            let registry = registry.clone();
            Box::new(move |_: FillNotification| {
                let exit = registry
                    .place(
                        gateway.as_ref(),
                        &Instrument::new("AAPL"),
                        OrderSide::Sell,
                        10,
                        OrderSpec::Market,
                        Box::new(|_: FillNotification| {}),
                    )
                    .unwrap();
                tx.send(exit).unwrap();
            })
        };
        let entry = registry
            .place(
                gateway.as_ref(),
                &Instrument::new("AAPL"),
                OrderSide::Buy,
                10,
                OrderSpec::Market,
                follow_up,
            )
            .unwrap();

        registry.on_execution(entry, &report(entry, 10, 1.0));
        let exit = rx.try_recv().unwrap();
        assert!(registry.is_registered(exit));
        assert_eq!(gateway.placed_orders().len(), 2);
    }
}
