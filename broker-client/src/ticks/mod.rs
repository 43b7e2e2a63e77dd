//! Realtime tick subscriptions.
//!
//! One gateway stream is opened per instrument, however many subscribers ask
//! for it. Each subscriber gets a process-unique `SubscriberHandle`; the
//! stream is closed as soon as its last subscriber cancels, so a
//! `Subscription` never stays in the registry with no subscribers.
//!
//! Inbound ticks are fanned out from the pump thread into one `Mailbox` per
//! subscriber. Callbacks run on the mailbox threads, outside the registry
//! lock, so a callback may subscribe or cancel without deadlocking.

mod mailbox;

use crate::error::Result;
use log::{debug, error, trace, warn};
use mailbox::{join_worker, Mailbox};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use trading::{
    Contract, ContractDefaults, Gateway, Instrument, SubscriberHandle, SubscriptionId, Tick,
    TickType,
};

#[derive(Default)]
struct TickBook {
    /// Instrument -> its single live stream.
    subscriptions: HashMap<Instrument, SubscriptionId>,
    /// Stream -> its subscribers. Never holds an empty map.
    subscribers: HashMap<SubscriptionId, HashMap<SubscriberHandle, Mailbox>>,
    next_handle: u64,
    /// Streams this registry opened and has since closed. Ticks already in
    /// flight when a stream closes may still arrive for these.
    closed: HashSet<SubscriptionId>,
    /// Delivery threads of cancelled subscribers, joined on shutdown.
    retired: Vec<JoinHandle<()>>,
}

impl TickBook {
    fn mint_handle(&mut self) -> SubscriberHandle {
        let handle = SubscriberHandle::new(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn retire(&mut self, mailbox: Mailbox) {
        self.retired.retain(|worker| !worker.is_finished());
        self.retired.push(mailbox.close());
    }
}

enum Route {
    Delivered,
    Closed,
    Unknown,
}

pub struct TickRegistry {
    book: Mutex<TickBook>,
    contract_defaults: ContractDefaults,
    tick_type: TickType,
}

impl TickRegistry {
    pub fn new(contract_defaults: ContractDefaults, tick_type: TickType) -> Self {
        Self {
            book: Mutex::new(TickBook::default()),
            contract_defaults,
            tick_type,
        }
    }

    fn book(&self) -> MutexGuard<'_, TickBook> {
        self.book
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `callback` for every tick of `instrument`.
    ///
    /// Opens the gateway stream if this is the instrument's first subscriber.
    /// The stream is opened and the subscriber inserted under one lock hold, so
    /// a tick dispatched for the new stream always finds its subscriber.
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` to later pass to `cancel`.
    /// * `Err(ClientError::Gateway)` if the stream could not be opened.
    /// * `Err(ClientError::Io)` if the delivery thread could not be spawned.
    pub fn subscribe<F>(
        &self,
        gateway: &dyn Gateway,
        instrument: &Instrument,
        callback: F,
    ) -> Result<SubscriberHandle>
    where
        F: FnMut(&Tick) + Send + 'static,
    {
        let mailbox = Mailbox::spawn(instrument, callback)?;

        let mut book = self.book();
        let subscription_id = match book.subscriptions.get(instrument) {
            Some(id) => *id,
            None => {
                let contract = Contract::from_instrument(instrument, &self.contract_defaults);
                match gateway.subscribe_ticks(&contract, self.tick_type, 0, false) {
                    Ok(id) => {
                        debug!("Opened {} stream {} for {}", self.tick_type, id, instrument);
                        book.subscriptions.insert(instrument.clone(), id);
                        book.closed.remove(&id);
                        id
                    }
                    Err(e) => {
                        drop(book);
                        join_worker(mailbox.close());
                        return Err(e.into());
                    }
                }
            }
        };

        let handle = book.mint_handle();
        book.subscribers
            .entry(subscription_id)
            .or_default()
            .insert(handle, mailbox);
        debug!("Subscriber {} added to {} ({})", handle, instrument, subscription_id);
        Ok(handle)
    }

    /// Removes one subscriber. Closes the gateway stream when it was the last.
    ///
    /// Unknown instruments or handles are ignored and cause no gateway call.
    pub fn cancel(&self, gateway: &dyn Gateway, instrument: &Instrument, handle: SubscriberHandle) {
        let mut book = self.book();
        let Some(&subscription_id) = book.subscriptions.get(instrument) else {
            return;
        };
        let Some(subscribers) = book.subscribers.get_mut(&subscription_id) else {
            error!("Stream {} of {} has no subscriber set", subscription_id, instrument);
            return;
        };
        let Some(mailbox) = subscribers.remove(&handle) else {
            return;
        };
        let emptied = subscribers.is_empty();
        book.retire(mailbox);
        debug!("Subscriber {} removed from {}", handle, instrument);

        if emptied {
            book.subscribers.remove(&subscription_id);
            book.subscriptions.remove(instrument);
            book.closed.insert(subscription_id);
            if let Err(e) = gateway.unsubscribe_ticks(subscription_id) {
                warn!("Failed to cancel stream {} for {}: {}", subscription_id, instrument, e);
            }
            debug!("Closed stream {} for {}", subscription_id, instrument);
        }
    }

    /// Fans `tick` out to every subscriber of `subscription_id`.
    ///
    /// Called from the pump thread only. Each subscriber receives the tick
    /// exactly once, in gateway arrival order. Ticks for a stream that was
    /// closed are dropped. A tick for a stream that was never opened breaks
    /// the gateway contract and trips a debug assertion.
    pub fn dispatch(&self, subscription_id: SubscriptionId, tick: &Tick) {
        let route = {
            let book = self.book();
            match book.subscribers.get(&subscription_id) {
                Some(subscribers) => {
                    for (handle, mailbox) in subscribers {
                        if !mailbox.deliver(tick) {
                            warn!("Subscriber {} on stream {} is gone", handle, subscription_id);
                        }
                    }
                    Route::Delivered
                }
                None if book.closed.contains(&subscription_id) => Route::Closed,
                None => Route::Unknown,
            }
        };

        match route {
            Route::Delivered => {}
            Route::Closed => {
                trace!("Dropping late tick for closed stream {}", subscription_id);
            }
            Route::Unknown => {
                error!("Received tick for unknown stream {}", subscription_id);
                debug_assert!(false, "tick dispatched for unknown stream {}", subscription_id);
            }
        }
    }

    /// Closes every mailbox and waits for queued ticks to be delivered.
    ///
    /// Gateway streams are left to the session teardown.
    pub fn shutdown(&self) {
        let (mailboxes, retired) = {
            let mut book = self.book();
            let open: Vec<SubscriptionId> = book.subscriptions.drain().map(|(_, id)| id).collect();
            book.closed.extend(open);
            let mailboxes: Vec<Mailbox> = book
                .subscribers
                .drain()
                .flat_map(|(_, subscribers)| subscribers.into_values())
                .collect();
            (mailboxes, std::mem::take(&mut book.retired))
        };

        for mailbox in mailboxes {
            join_worker(mailbox.close());
        }
        for worker in retired {
            join_worker(worker);
        }
    }

    /// The live stream of `instrument`, if any.
    pub fn subscription_for(&self, instrument: &Instrument) -> Option<SubscriptionId> {
        self.book().subscriptions.get(instrument).copied()
    }

    pub fn subscriber_count(&self, instrument: &Instrument) -> usize {
        let book = self.book();
        book.subscriptions
            .get(instrument)
            .and_then(|id| book.subscribers.get(id))
            .map_or(0, HashMap::len)
    }

    /// Number of live gateway streams.
    pub fn len(&self) -> usize {
        self.book().subscriptions.len()
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
    use std::time::Duration;

    fn registry() -> TickRegistry {
        TickRegistry::new(ContractDefaults::default(), TickType::AllLast)
    }

    fn tick(price: f64) -> Tick {
        Tick::new(TickType::AllLast, 1_700_000_000, price, 100, "ISLAND")
    }

    #[test]
    fn test_dedup_and_eager_teardown() {
        let gateway = ScriptedGateway::new().with_first_subscription_id(42);
        let registry = registry();
        let aapl = Instrument::new("AAPL");

        let first = registry.subscribe(&gateway, &aapl, |_: &Tick| {}).unwrap();
        let second = registry.subscribe(&gateway, &aapl, |_: &Tick| {}).unwrap();
        assert_ne!(first, second);
        assert_eq!(gateway.subscriptions().len(), 1);
        assert_eq!(registry.subscription_for(&aapl), Some(SubscriptionId::new(42)));
        assert_eq!(registry.subscriber_count(&aapl), 2);

        registry.cancel(&gateway, &aapl, first);
        assert!(gateway.unsubscriptions().is_empty());
        assert_eq!(registry.subscriber_count(&aapl), 1);

        registry.cancel(&gateway, &aapl, second);
        assert_eq!(gateway.unsubscriptions(), vec![SubscriptionId::new(42)]);
        assert_eq!(registry.subscription_for(&aapl), None);
        assert!(registry.is_empty());
        registry.shutdown();
    }

    #[test]
    fn test_contract_uses_defaults() {
        let gateway = ScriptedGateway::new();
        let registry = TickRegistry::new(ContractDefaults::default(), TickType::BidAsk);
        registry
            .subscribe(&gateway, &Instrument::new("msft"), |_: &Tick| {})
            .unwrap();

        let (_, contract, tick_type) = gateway.subscriptions().remove(0);
        assert_eq!(contract, Contract::us_stock("MSFT"));
        assert_eq!(tick_type, TickType::BidAsk);
        registry.shutdown();
    }

    #[test]
    fn test_dispatch_only_reaches_own_stream() {
        let gateway = ScriptedGateway::new();
        let registry = registry();
        let (tx, rx) = mpsc::channel();

        let tx_a = tx.clone();
        registry
            .subscribe(&gateway, &Instrument::new("AAPL"), move |t: &Tick| {
                tx_a.send(("AAPL", t.price)).unwrap();
            })
            .unwrap();
        registry
            .subscribe(&gateway, &Instrument::new("MSFT"), move |t: &Tick| {
                tx.send(("MSFT", t.price)).unwrap();
            })
            .unwrap();

        let aapl_stream = registry.subscription_for(&Instrument::new("AAPL")).unwrap();
        registry.dispatch(aapl_stream, &tick(150.0));
        registry.shutdown();

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, vec![("AAPL", 150.0)]);
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let gateway = ScriptedGateway::new();
        let registry = registry();
        let aapl = Instrument::new("AAPL");

        registry.cancel(&gateway, &aapl, SubscriberHandle::new(7));
        let handle = registry.subscribe(&gateway, &aapl, |_: &Tick| {}).unwrap();
        registry.cancel(&gateway, &aapl, SubscriberHandle::new(handle.value() + 100));
        registry.cancel(&gateway, &Instrument::new("MSFT"), handle);

        assert!(gateway.unsubscriptions().is_empty());
        assert_eq!(registry.subscriber_count(&aapl), 1);
        registry.shutdown();
    }

    #[test]
    fn test_failed_stream_leaves_no_entry() {
        let gateway = ScriptedGateway::new().rejecting_subscriptions();
        let registry = registry();
        let aapl = Instrument::new("AAPL");

        assert!(registry.subscribe(&gateway, &aapl, |_: &Tick| {}).is_err());
        assert_eq!(registry.subscription_for(&aapl), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callback_may_cancel_itself() {
        let gateway = std::sync::Arc::new(ScriptedGateway::new());
        let registry = std::sync::Arc::new(registry());
        let aapl = Instrument::new("AAPL");
        let (handle_tx, handle_rx) = mpsc::channel::<SubscriberHandle>();
        let (done_tx, done_rx) = mpsc::channel();

        let callback = {
            let gateway = gateway.clone();
            let registry = registry.clone();
            let aapl = aapl.clone();
            move |_: &Tick| {
                if let Ok(own) = handle_rx.try_recv() {
                    registry.cancel(gateway.as_ref(), &aapl, own);
                    done_tx.send(()).unwrap();
                }
            }
        };
        let handle = registry.subscribe(gateway.as_ref(), &aapl, callback).unwrap();
        handle_tx.send(handle).unwrap();

        let stream = registry.subscription_for(&aapl).unwrap();
        registry.dispatch(stream, &tick(1.0));
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        assert_eq!(registry.subscription_for(&aapl), None);
        assert_eq!(gateway.unsubscriptions(), vec![stream]);
        registry.shutdown();
    }

    #[test]
    fn test_late_tick_for_closed_stream_is_dropped() {
        let gateway = ScriptedGateway::new().with_first_subscription_id(7);
        let registry = registry();
        let aapl = Instrument::new("AAPL");
        let msft = Instrument::new("MSFT");

        let handle = registry.subscribe(&gateway, &aapl, |_: &Tick| {}).unwrap();
        let closed = registry.subscription_for(&aapl).unwrap();
        registry.cancel(&gateway, &aapl, handle);
        registry.dispatch(closed, &tick(1.0));

        let (tx, rx) = mpsc::channel();
        registry
            .subscribe(&gateway, &msft, move |t: &Tick| tx.send(t.price).unwrap())
            .unwrap();
        let open = registry.subscription_for(&msft).unwrap();
        registry.dispatch(open, &tick(42.0));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42.0);

        // Streams torn down by shutdown are closed too.
        registry.shutdown();
        registry.dispatch(open, &tick(43.0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unknown stream")]
    fn test_dispatch_unknown_stream_asserts() {
        registry().dispatch(SubscriptionId::new(99), &tick(1.0));
    }
}
