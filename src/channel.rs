//! Bounded drop-oldest channel for processed node events.
//!
//! The producer side never blocks: when the queue is at capacity, the
//! oldest element is discarded to make room for the new one. Consumers
//! that cannot keep up lose old events silently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    senders: AtomicUsize,
}

/// Producer half of a dropping channel. Cloneable; `send` never blocks.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of a dropping channel.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a channel pair with the given capacity.
///
/// e.g. `let (tx, rx) = channel::dropping(1024);`
pub fn dropping<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "dropping channel capacity must be nonzero");
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        notify: Notify::new(),
        capacity,
        senders: AtomicUsize::new(1),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

impl<T> Sender<T> {
    /// Enqueue a value, discarding the oldest queued value when full.
    pub fn send(&self, value: T) {
        {
            let mut queue = self
                .shared
                .queue
                .lock()
                .expect("dropping channel lock poisoned");
            if queue.len() == self.shared.capacity {
                queue.pop_front();
            }
            queue.push_back(value);
        }
        self.shared.notify.notify_one();
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Sender {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            // last sender gone; wake the receiver so it can observe closure
            self.shared.notify.notify_one();
        }
    }
}

impl<T> Receiver<T> {
    /// Receive the next value, waiting if the queue is empty.
    ///
    /// Returns `None` once every sender has been dropped and the queue
    /// has been drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            {
                let mut queue = self
                    .shared
                    .queue
                    .lock()
                    .expect("dropping channel lock poisoned");
                if let Some(value) = queue.pop_front() {
                    return Some(value);
                }
            }
            if self.shared.senders.load(Ordering::SeqCst) == 0 {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Receive the next value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.shared
            .queue
            .lock()
            .expect("dropping channel lock poisoned")
            .pop_front()
    }
}
