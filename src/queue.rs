//! Per-client bounded send queue (C6): FIFO with *drop-oldest* overflow.
//! When full, a newly offered item evicts the oldest rather than blocking
//! the producer — fan-out must never apply back-pressure to capture.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T: Send> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Offer an item. Non-blocking: if the queue is at capacity, the oldest
    /// undelivered item is discarded to make room.
    pub fn offer(&self, item: T) {
        {
            let mut guard = self.items.lock();
            if guard.len() >= self.capacity {
                guard.pop_front();
            }
            guard.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Pop the oldest item, waiting if the queue is momentarily empty.
    /// Returns `None` once the queue has been closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue: the dedicated drain task's next `pop()` (after
    /// draining what remains) returns `None` and exits.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
