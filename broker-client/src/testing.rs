//! In-memory gateway for tests.
//!
//! `ScriptedGateway` records every outbound request and queues inbound events
//! until the pump calls `process_messages`. Connect behaviour, id sequences
//! and failure modes are configured with builder methods.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use trading::{
    error::Result, Contract, Execution, Gateway, GatewayError, OrderId, OrderRequest,
    OrderStatusHandler, SubscriptionId, Tick, TickHandler, TickType,
};

enum Inbound {
    Tick(SubscriptionId, Tick),
    Execution(OrderId, Contract, Execution),
}

struct Script {
    /// `None` never connects; `Some(n)` fails `n` attempts, then connects.
    connect_failures: Option<u32>,
    reject_orders: bool,
    reject_subscriptions: bool,
    fill_during_place: Option<Duration>,
    next_order_id: i64,
    next_subscription_id: i64,
    placed: Vec<(OrderId, Contract, OrderRequest)>,
    cancelled: Vec<OrderId>,
    subscribed: Vec<(SubscriptionId, Contract, TickType)>,
    unsubscribed: Vec<SubscriptionId>,
    inbound: VecDeque<Inbound>,
}

pub struct ScriptedGateway {
    script: Mutex<Script>,
    connected: AtomicBool,
    connect_attempts: AtomicU32,
    process_calls: AtomicU32,
    order_handler: Mutex<Option<OrderStatusHandler>>,
    tick_handler: Mutex<Option<TickHandler>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// A gateway that connects on the first attempt.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                connect_failures: Some(0),
                reject_orders: false,
                reject_subscriptions: false,
                fill_during_place: None,
                next_order_id: 1,
                next_subscription_id: 1,
                placed: Vec::new(),
                cancelled: Vec::new(),
                subscribed: Vec::new(),
                unsubscribed: Vec::new(),
                inbound: VecDeque::new(),
            }),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU32::new(0),
            process_calls: AtomicU32::new(0),
            order_handler: Mutex::new(None),
            tick_handler: Mutex::new(None),
        }
    }

    pub fn failing_connects(self, failures: u32) -> Self {
        self.script().connect_failures = Some(failures);
        self
    }

    pub fn never_connects(self) -> Self {
        self.script().connect_failures = None;
        self
    }

    pub fn with_first_order_id(self, id: i64) -> Self {
        self.script().next_order_id = id;
        self
    }

    pub fn with_first_subscription_id(self, id: i64) -> Self {
        self.script().next_subscription_id = id;
        self
    }

    pub fn rejecting_orders(self) -> Self {
        self.script().reject_orders = true;
        self
    }

    pub fn rejecting_subscriptions(self) -> Self {
        self.script().reject_subscriptions = true;
        self
    }

    /// Makes `place_order` queue a full fill for the new order and then stall
    /// for `stall` before returning, so the pump sees the report while the
    /// placement is still in flight.
    pub fn fill_during_place(self, stall: Duration) -> Self {
        self.script().fill_during_place = Some(stall);
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_tick(&self, subscription_id: SubscriptionId, tick: Tick) {
        self.script()
            .inbound
            .push_back(Inbound::Tick(subscription_id, tick));
    }

    pub fn push_execution(&self, order_id: OrderId, execution: Execution) {
        let contract = self
            .script()
            .placed
            .iter()
            .find(|(id, _, _)| *id == order_id)
            .map(|(_, contract, _)| contract.clone())
            .unwrap_or_else(|| Contract::us_stock("UNKNOWN"));
        self.script()
            .inbound
            .push_back(Inbound::Execution(order_id, contract, execution));
    }

    /// Simulates the broker closing the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::Acquire)
    }

    pub fn process_calls(&self) -> u32 {
        self.process_calls.load(Ordering::Acquire)
    }

    pub fn placed_orders(&self) -> Vec<(OrderId, Contract, OrderRequest)> {
        self.script().placed.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<OrderId> {
        self.script().cancelled.clone()
    }

    pub fn subscriptions(&self) -> Vec<(SubscriptionId, Contract, TickType)> {
        self.script().subscribed.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<SubscriptionId> {
        self.script().unsubscribed.clone()
    }

    /// Number of order and market-data requests received.
    pub fn request_count(&self) -> usize {
        let script = self.script();
        script.placed.len()
            + script.cancelled.len()
            + script.subscribed.len()
            + script.unsubscribed.len()
    }

    pub fn has_handlers(&self) -> bool {
        let order = self.order_handler.lock().unwrap_or_else(|p| p.into_inner());
        let tick = self.tick_handler.lock().unwrap_or_else(|p| p.into_inner());
        order.is_some() && tick.is_some()
    }
}

impl Gateway for ScriptedGateway {
    fn connect(&self, _host: &str, _port: u16, _client_id: i32) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::AcqRel);
        let mut script = self.script();
        match script.connect_failures.as_mut() {
            Some(0) => {
                self.connected.store(true, Ordering::Release);
                Ok(())
            }
            Some(remaining) => {
                *remaining -= 1;
                Err(GatewayError::NotConnected)
            }
            None => Err(GatewayError::NotConnected),
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn process_messages(&self) -> Result<()> {
        self.process_calls.fetch_add(1, Ordering::AcqRel);
        let batch: Vec<Inbound> = self.script().inbound.drain(..).collect();

        for event in batch {
            match event {
                Inbound::Tick(id, tick) => {
                    let handler = self.tick_handler.lock().unwrap_or_else(|p| p.into_inner());
                    if let Some(handler) = handler.as_ref() {
                        handler(id, &tick);
                    }
                }
                Inbound::Execution(id, contract, execution) => {
                    let handler = self.order_handler.lock().unwrap_or_else(|p| p.into_inner());
                    if let Some(handler) = handler.as_ref() {
                        handler(id, &contract, &execution);
                    }
                }
            }
        }
        Ok(())
    }

    fn place_order(&self, contract: &Contract, order: &OrderRequest) -> Result<OrderId> {
        let (id, stall) = {
            let mut script = self.script();
            if script.reject_orders {
                return Err(GatewayError::Rejected("orders disabled".to_string()));
            }
            let id = OrderId::new(script.next_order_id);
            script.next_order_id += 1;
            script.placed.push((id, contract.clone(), order.clone()));

            if script.fill_during_place.is_some() {
                let price = order.spec().limit_price().unwrap_or(100.0);
                let quantity = order.total_quantity();
                let execution = Execution::new(id, order.action(), "20240102  09:30:00")
                    .with_fill(quantity, price, quantity, price);
                script
                    .inbound
                    .push_back(Inbound::Execution(id, contract.clone(), execution));
            }
            (id, script.fill_during_place)
        };

        if let Some(stall) = stall {
            thread::sleep(stall);
        }
        Ok(id)
    }

    fn cancel_order(&self, order_id: OrderId) -> Result<()> {
        self.script().cancelled.push(order_id);
        Ok(())
    }

    fn subscribe_ticks(
        &self,
        contract: &Contract,
        tick_type: TickType,
        _history_depth: u32,
        _snapshot_only: bool,
    ) -> Result<SubscriptionId> {
        let mut script = self.script();
        if script.reject_subscriptions {
            return Err(GatewayError::Rejected("market data disabled".to_string()));
        }
        let id = SubscriptionId::new(script.next_subscription_id);
        script.next_subscription_id += 1;
        script.subscribed.push((id, contract.clone(), tick_type));
        Ok(id)
    }

    fn unsubscribe_ticks(&self, subscription_id: SubscriptionId) -> Result<()> {
        let mut script = self.script();
        script.unsubscribed.push(subscription_id);
        script
            .inbound
            .retain(|event| !matches!(event, Inbound::Tick(id, _) if *id == subscription_id));
        Ok(())
    }

    fn on_order_status(&self, handler: OrderStatusHandler) {
        *self.order_handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    fn on_realtime_tick(&self, handler: TickHandler) {
        *self.tick_handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }
}
