//! This module defines [DropQueue], a thread-safe FIFO with a blocking pop.
//!
//! The queue itself never drops anything. The name comes from how it's used:
//! a producer pushes, and whoever owns the queue decides what gets discarded
//! when the consumer falls behind (see [super::input_throttle]).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{ChannelError, ChannelResult, THREAD_PANIC_MSG};

/// A thread-safe FIFO queue with a blocking [pop](Self::wait_and_pop).
///
/// Every insertion wakes exactly one waiting consumer (there is no broadcast),
/// so any number of producers plus a *single* consumer is the only topology
/// that's safe without extra coordination.
///
/// All operations take the same lock. [Self::len] and [Self::is_empty] are
/// point-in-time snapshots.
#[derive(Debug)]
pub struct DropQueue<T> {
    queue: Mutex<VecDeque<T>>,
    notifier: Condvar,
}

impl<T> DropQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty queue with space for `capacity` items before it has to
    /// reallocate. The queue is not bounded by this number.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notifier: Condvar::new(),
        }
    }

    /// Append `item` to the back of the queue and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.notifier.notify_one();
    }

    /// Put `item` at the front of the queue (it will be the next item popped)
    /// and wake one waiting consumer.
    pub fn push_front(&self, item: T) {
        self.lock().push_front(item);
        self.notifier.notify_one();
    }

    /// Block until the queue has an item in it, then remove and return the
    /// front item.
    pub fn wait_and_pop(&self) -> T {
        let mut queue = self.lock();

        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }

            // Either a producer pushed (and we'll find the item above) or this
            // was a spurious wakeup and we go back to sleep.
            queue = self.notifier.wait(queue).expect(THREAD_PANIC_MSG);
        }
    }

    /// Like [Self::wait_and_pop] but gives up after `timeout`, returning a
    /// [ChannelError::Timeout] error. This function's execution may take
    /// slightly longer than `timeout`.
    pub fn wait_and_pop_timeout(&self, timeout: Duration) -> ChannelResult<T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();

        loop {
            if let Some(item) = queue.pop_front() {
                return Ok(item);
            }

            let time_until_deadline = deadline.saturating_duration_since(Instant::now());
            if time_until_deadline.is_zero() {
                return Err(ChannelError::Timeout { timeout });
            }

            queue = self
                .notifier
                .wait_timeout(queue, time_until_deadline)
                .expect(THREAD_PANIC_MSG)
                .0;
        }
    }

    /// Remove and return the front item if there is one. Never waits for a
    /// producer (but may block briefly on the lock).
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return the front item, but only if `predicate` accepts it.
    /// The check and the removal happen under one lock.
    pub fn try_pop_if(&self, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut queue = self.lock();
        if queue.front().is_some_and(predicate) {
            queue.pop_front()
        } else {
            None
        }
    }

    /// Whether the queue was empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The number of queued items at the time of the call.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every queued item. Waiting consumers are *not* woken.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().expect(THREAD_PANIC_MSG)
    }
}

impl<T> Default for DropQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
