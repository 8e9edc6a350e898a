//! Blocking multi-producer, multi-consumer queue.
//!
//! An `mpsc` channel whose receiver sits behind a mutex, so any number of
//! workers can pop. The queue owns both ends and never disconnects.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Unbounded MPMC queue.
#[derive(Debug)]
pub struct Queue<T> {
    sender: Sender<T>,
    receiver: Mutex<Receiver<T>>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    fn receiver(&self) -> MutexGuard<'_, Receiver<T>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(item);
    }

    pub fn push_all<I: IntoIterator<Item = T>>(&self, items: I) {
        for item in items {
            self.push(item);
        }
    }

    /// Block until an item is available.
    pub fn pop(&self) -> Option<T> {
        self.receiver().recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver().recv_timeout(timeout).ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        match self.receiver().try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Collect up to `max` items. Waits at most `first_wait` for the first
    /// one, then keeps filling until `fill_wait` has passed since it
    /// arrived. Returns an empty batch on timeout.
    pub fn pop_batch(&self, max: usize, first_wait: Duration, fill_wait: Duration) -> Vec<T> {
        let mut batch = Vec::with_capacity(max);
        if max == 0 {
            return batch;
        }
        let receiver = self.receiver();
        match receiver.recv_timeout(first_wait) {
            Ok(item) => batch.push(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return batch,
        }

        let deadline = Instant::now() + fill_wait;
        while batch.len() < max {
            // Drain whatever is already queued before sleeping.
            match receiver.try_recv() {
                Ok(item) => {
                    batch.push(item);
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo() {
        let queue = Queue::new();
        queue.push_all([1, 2, 3]);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(3));
        assert_eq!(queue.try_pop(), None);
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_pop_batch_caps_size() {
        let queue = Queue::new();
        queue.push_all(0..10);
        let batch = queue.pop_batch(4, Duration::from_millis(10), Duration::from_millis(10));
        assert_eq!(batch, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_pop_batch_returns_partial_after_deadline() {
        let queue: Queue<u32> = Queue::new();
        assert!(queue
            .pop_batch(4, Duration::from_millis(1), Duration::from_millis(1))
            .is_empty());

        queue.push(7);
        let batch = queue.pop_batch(4, Duration::from_millis(10), Duration::from_millis(2));
        assert_eq!(batch, vec![7]);
    }

    #[test]
    fn test_many_consumers() {
        let queue = Arc::new(Queue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut sum = 0u64;
                    while let Some(item) = queue.pop() {
                        if item == 0 {
                            break;
                        }
                        sum += item;
                    }
                    sum
                })
            })
            .collect();

        queue.push_all(1..=100u64);
        queue.push_all([0, 0, 0, 0]);
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, 5050);
    }
}
