//! Ordered, fire-and-forget delivery of callbacks.
//!
//! Components raise demand changes while holding their own state; handing the
//! value to a dispatcher task keeps the callback chain from re-entering a
//! lock that is still held. Values are delivered eventually, in the order
//! they were raised.

use tokio::sync::mpsc;
use tracing::debug;

pub struct Dispatcher<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Spawns the delivery task. Must be called from within a tokio runtime.
    pub fn spawn<F>(name: &'static str, mut handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                handler(value);
            }
            debug!(dispatcher = name, "dispatcher drained");
        });
        Self { name, tx }
    }

    pub fn send(&self, value: T) {
        if self.tx.send(value).is_err() {
            debug!(dispatcher = self.name, "dispatcher closed, dropping value");
        }
    }
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn delivers_in_order_raised() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = Dispatcher::spawn("test", move |value: u32| {
            sink.lock().unwrap().push(value);
        });

        for value in 0..5 {
            dispatcher.send(value);
        }
        drop(dispatcher);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
