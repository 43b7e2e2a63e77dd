//! Paper trading gateway.
//!
//! Simulates a broker session in memory. Every call to `process_messages`
//! advances one random-walk step per open stream, emits one tick per stream,
//! and works the resting orders against the new prices. Market orders fill
//! at the last simulated price; limit orders fill at their limit once the
//! price crosses it.

use chrono::{Local, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use trading::error::Result;
use trading::{
    Contract, Execution, Gateway, GatewayError, OrderId, OrderRequest, OrderSide,
    OrderStatusHandler, OrderSpec, SubscriptionId, Tick, TickHandler, TickType,
};

/// Tunables of the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Connect attempts rejected before the session comes up.
    pub failing_connects: u32,
    /// Starting price of every symbol.
    pub initial_price: f64,
    /// Maximum relative move per step.
    pub volatility: f64,
    /// Largest quantity filled per step. `None` fills orders in one report.
    pub fill_clip: Option<u64>,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            failing_connects: 0,
            initial_price: 100.0,
            volatility: 0.01,
            fill_clip: None,
            seed: None,
        }
    }
}

struct Stream {
    contract: Contract,
    tick_type: TickType,
}

struct WorkingOrder {
    contract: Contract,
    request: OrderRequest,
    filled: u64,
    notional: f64,
}

struct PaperState {
    rng: StdRng,
    remaining_failures: u32,
    next_order_id: i64,
    next_subscription_id: i64,
    streams: HashMap<SubscriptionId, Stream>,
    prices: HashMap<String, f64>,
    working: HashMap<OrderId, WorkingOrder>,
}

impl PaperState {
    fn price_of(&self, symbol: &str, initial: f64) -> f64 {
        self.prices.get(symbol).copied().unwrap_or(initial)
    }
}

enum Event {
    Tick(SubscriptionId, Tick),
    Execution(OrderId, Contract, Execution),
}

pub struct PaperGateway {
    config: PaperConfig,
    state: Mutex<PaperState>,
    connected: AtomicBool,
    order_handler: Mutex<Option<OrderStatusHandler>>,
    tick_handler: Mutex<Option<TickHandler>>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new(PaperConfig::default())
    }
}

impl PaperGateway {
    pub fn new(config: PaperConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: Mutex::new(PaperState {
                rng,
                remaining_failures: config.failing_connects,
                next_order_id: 1,
                next_subscription_id: 1,
                streams: HashMap::new(),
                prices: HashMap::new(),
                working: HashMap::new(),
            }),
            config,
            connected: AtomicBool::new(false),
            order_handler: Mutex::new(None),
            tick_handler: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }

    /// Last simulated price of `symbol`.
    pub fn last_price(&self, symbol: &str) -> f64 {
        self.state().price_of(symbol, self.config.initial_price)
    }

    /// Number of orders still working.
    pub fn working_orders(&self) -> usize {
        self.state().working.len()
    }

    /// Advances the simulation by one step and collects what it produced.
    fn step(&self) -> Vec<Event> {
        let mut state = self.state();
        let mut events = Vec::new();
        let now = Utc::now().timestamp();

        let mut ids: Vec<SubscriptionId> = state.streams.keys().copied().collect();
        ids.sort();
        for id in ids {
            let (symbol, exchange, tick_type) = match state.streams.get(&id) {
                Some(stream) => (
                    stream.contract.symbol.clone(),
                    stream.contract.primary_exchange.clone(),
                    stream.tick_type,
                ),
                None => continue,
            };
            let price = state.price_of(&symbol, self.config.initial_price);
            let change = state
                .rng
                .gen_range(-self.config.volatility..=self.config.volatility);
            let next = ((price * (1.0 + change)) * 100.0).round() / 100.0;
            let next = next.max(0.01);
            let size = state.rng.gen_range(1..=5u64) * 100;
            state.prices.insert(symbol, next);
            events.push(Event::Tick(id, Tick::new(tick_type, now, next, size, exchange)));
        }

        let broker_time = Local::now().format("%Y%m%d  %H:%M:%S").to_string();
        let initial = self.config.initial_price;
        let clip = self.config.fill_clip;
        let prices = state.prices.clone();
        let mut done = Vec::new();
        for (&order_id, order) in state.working.iter_mut() {
            let market = prices
                .get(&order.contract.symbol)
                .copied()
                .unwrap_or(initial);
            let Some(fill_price) = fill_price(&order.request, market) else {
                continue;
            };
            let remaining = order.request.total_quantity() - order.filled;
            let shares = clip.map_or(remaining, |clip| remaining.min(clip.max(1)));
            order.filled += shares;
            order.notional += shares as f64 * fill_price;
            let average = order.notional / order.filled as f64;

            let execution = Execution::new(order_id, order.request.action(), broker_time.clone())
                .with_fill(shares, fill_price, order.filled, average);
            events.push(Event::Execution(order_id, order.contract.clone(), execution));
            if order.filled == order.request.total_quantity() {
                done.push(order_id);
            }
        }
        for order_id in done {
            state.working.remove(&order_id);
            debug!("Paper order {} completely filled", order_id);
        }
        events
    }
}

/// Price an order executes at against `market`, or `None` while it rests.
fn fill_price(request: &OrderRequest, market: f64) -> Option<f64> {
    match (request.spec(), request.action()) {
        (OrderSpec::Market, _) => Some(market),
        (OrderSpec::Limit(limit), OrderSide::Buy) if market <= limit => Some(limit),
        (OrderSpec::Limit(limit), OrderSide::Sell) if market >= limit => Some(limit),
        (OrderSpec::Limit(_), _) => None,
    }
}

impl Gateway for PaperGateway {
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<()> {
        let mut state = self.state();
        if state.remaining_failures > 0 {
            state.remaining_failures -= 1;
            warn!("Paper session refused connection to {}:{}", host, port);
            return Err(GatewayError::NotConnected);
        }
        self.connected.store(true, Ordering::Release);
        info!(
            "Paper session open on {}:{} for client {}",
            host, port, client_id
        );
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let mut state = self.state();
            state.streams.clear();
            state.working.clear();
            info!("Paper session closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn process_messages(&self) -> Result<()> {
        self.ensure_connected()?;
        for event in self.step() {
            match event {
                Event::Tick(id, tick) => {
                    let handler = self.tick_handler.lock().unwrap_or_else(|p| p.into_inner());
                    if let Some(handler) = handler.as_ref() {
                        handler(id, &tick);
                    }
                }
                Event::Execution(id, contract, execution) => {
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
        self.ensure_connected()?;
        if order.total_quantity() == 0 {
            return Err(GatewayError::Rejected("zero quantity".to_string()));
        }
        let mut state = self.state();
        let order_id = OrderId::new(state.next_order_id);
        state.next_order_id += 1;
        state.working.insert(
            order_id,
            WorkingOrder {
                contract: contract.clone(),
                request: order.clone(),
                filled: 0,
                notional: 0.0,
            },
        );
        debug!(
            "Paper order {} accepted: {} {} {}",
            order_id,
            order.action(),
            order.total_quantity(),
            contract.symbol
        );
        Ok(order_id)
    }

    fn cancel_order(&self, order_id: OrderId) -> Result<()> {
        self.ensure_connected()?;
        if self.state().working.remove(&order_id).is_some() {
            debug!("Paper order {} cancelled", order_id);
        }
        Ok(())
    }

    fn subscribe_ticks(
        &self,
        contract: &Contract,
        tick_type: TickType,
        _history_depth: u32,
        _snapshot_only: bool,
    ) -> Result<SubscriptionId> {
        self.ensure_connected()?;
        let mut state = self.state();
        let id = SubscriptionId::new(state.next_subscription_id);
        state.next_subscription_id += 1;
        state.streams.insert(
            id,
            Stream {
                contract: contract.clone(),
                tick_type,
            },
        );
        debug!("Paper stream {} opened for {}", id, contract.symbol);
        Ok(id)
    }

    fn unsubscribe_ticks(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.ensure_connected()?;
        self.state().streams.remove(&subscription_id);
        Ok(())
    }

    fn on_order_status(&self, handler: OrderStatusHandler) {
        *self.order_handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    fn on_realtime_tick(&self, handler: TickHandler) {
        *self.tick_handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }
}
