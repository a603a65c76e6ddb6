use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use prometheus::IntCounter;
use tokio::sync::Notify;

/// Bounded multi-producer queue that never blocks producers.
///
/// When full, `push` evicts the oldest entry and increments the `dropped`
/// counter.
pub struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: IntCounter,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize, dropped: IntCounter) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped,
        }
    }

    /// Returns `false` when an older entry had to be dropped.
    pub fn push(&self, item: T) -> bool {
        let evicted = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            let evicted = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            evicted
        };
        if evicted {
            self.dropped.inc();
        }
        self.notify.notify_one();
        !evicted
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *items).into()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for at least one item, then take everything. Returns an empty
    /// batch once the queue is closed and drained.
    pub async fn next_batch(&self) -> Vec<T> {
        loop {
            let notified = self.notify.notified();
            let batch = self.drain();
            if !batch.is_empty() || self.closed.load(Ordering::Acquire) {
                return batch;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
