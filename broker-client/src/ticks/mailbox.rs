use log::{error, trace};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use trading::{Instrument, Tick};

/// Per-subscriber delivery queue.
///
/// The registry keeps the sending half; a dedicated thread owns the callback
/// and runs it for every queued tick in arrival order. Dispatch therefore
/// never runs caller code while the registry lock is held.
pub(crate) struct Mailbox {
    sender: Sender<Tick>,
    worker: JoinHandle<()>,
}

impl Mailbox {
    pub(crate) fn spawn<F>(instrument: &Instrument, mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut(&Tick) + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Tick>();
        let name = format!("ticks-{}", instrument);
        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            for tick in receiver {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&tick)));
                if outcome.is_err() {
                    error!("[{}] Tick callback panicked at price {}", name, tick.price);
                }
            }
            trace!("[{}] Mailbox closed", name);
        })?;
        Ok(Self { sender, worker })
    }

    /// Queues a copy of `tick`. Returns `false` if the delivery thread is gone.
    pub(crate) fn deliver(&self, tick: &Tick) -> bool {
        self.sender.send(tick.clone()).is_ok()
    }

    /// Stops accepting ticks. Already queued ticks are still delivered; the
    /// returned handle finishes once they are.
    pub(crate) fn close(self) -> JoinHandle<()> {
        drop(self.sender);
        self.worker
    }
}

/// Joins a closed mailbox thread unless it is the calling thread.
pub(crate) fn join_worker(worker: JoinHandle<()>) {
    if worker.thread().id() == thread::current().id() {
        return;
    }
    if worker.join().is_err() {
        error!("Tick delivery thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trading::TickType;

    #[test]
    fn test_delivers_in_order_then_drains_on_close() {
        let (tx, rx) = mpsc::channel();
        let mailbox = Mailbox::spawn(&Instrument::new("AAPL"), move |tick: &Tick| {
            tx.send(tick.price).unwrap();
        })
        .unwrap();

        for price in [1.0, 2.0, 3.0] {
            assert!(mailbox.deliver(&Tick::new(TickType::AllLast, 0, price, 1, "ISLAND")));
        }
        join_worker(mailbox.close());

        let received: Vec<f64> = rx.try_iter().collect();
        assert_eq!(received, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_panicking_callback_keeps_mailbox_alive() {
        let (tx, rx) = mpsc::channel();
        let mailbox = Mailbox::spawn(&Instrument::new("AAPL"), move |tick: &Tick| {
            if tick.price < 0.0 {
                panic!("bad tick");
            }
            tx.send(tick.price).unwrap();
        })
        .unwrap();

        mailbox.deliver(&Tick::new(TickType::AllLast, 0, -1.0, 1, "ISLAND"));
        mailbox.deliver(&Tick::new(TickType::AllLast, 0, 5.0, 1, "ISLAND"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 5.0);
        join_worker(mailbox.close());
    }
}
