//! This module defines [InputThrottle], a [DropQueue] wrapper that bounds how
//! far a consumer can fall behind its producer.
//!
//! Under sustained overload the consumer only ever sees the newest input.
//! Items that say they [can't be dropped](Droppable::can_be_dropped) (stop
//! markers, for example) are always delivered.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use super::drop_queue::DropQueue;
use crate::{debug_log_trace, debug_log_warning};

/// The default for [InputThrottle::max_inputs_to_buffer].
pub const DEFAULT_MAX_INPUTS_TO_BUFFER: usize = 30;

/// Items that can be queued in an [InputThrottle].
///
/// Anything is droppable by default.
pub trait Droppable {
    /// Whether the throttle is allowed to skip this item to get to a newer one.
    fn can_be_dropped(&self) -> bool {
        true
    }
}

/// `None` is the "no more input" marker and is never dropped.
impl<T> Droppable for Option<T> {
    fn can_be_dropped(&self) -> bool {
        self.is_some()
    }
}

/// A thread-safe input queue that drops stale items when the consumer can't
/// keep up.
///
/// There are two ways items get dropped:
/// - [Self::queue_input] always enforces the [buffer
///   ceiling](Self::max_inputs_to_buffer) by discarding the *oldest* items,
///   regardless of whether dropping is [enabled](Self::drop_inputs). An item
///   that can't be dropped stops this, so while one waits at the front
///   [Self::len] can be more than the ceiling.
/// - [Self::next_input] skips ahead to the newest item when dropping is
///   enabled, stopping early at any item that can't be dropped.
///
/// Like [DropQueue], this supports many producers but only one consumer.
#[derive(Debug)]
pub struct InputThrottle<T: Droppable> {
    queue: DropQueue<T>,
    name: String,
    max_inputs_to_buffer: AtomicUsize,
    drop_inputs: AtomicBool,
    warn_when_dropping: AtomicBool,
    dropped: AtomicU64,
}

impl<T: Droppable> InputThrottle<T> {
    /// Create an empty throttle. `name` shows up in log messages. When
    /// `warn_when_dropping` is set, every drop is logged as a warning instead
    /// of a trace message.
    pub fn new(warn_when_dropping: bool, name: impl Into<String>) -> Self {
        Self {
            queue: DropQueue::with_capacity(DEFAULT_MAX_INPUTS_TO_BUFFER + 1),
            name: name.into(),
            max_inputs_to_buffer: AtomicUsize::new(DEFAULT_MAX_INPUTS_TO_BUFFER),
            drop_inputs: AtomicBool::new(true),
            warn_when_dropping: AtomicBool::new(warn_when_dropping),
            dropped: AtomicU64::new(0),
        }
    }

    /// Add an input to the back of the queue, then discard inputs from the
    /// front until no more than [Self::max_inputs_to_buffer] remain. Discarding
    /// stops early at an item that [can't be dropped](Droppable::can_be_dropped).
    pub fn queue_input(&self, item: T) {
        self.queue.push(item);

        let max = self.max_inputs_to_buffer();
        let mut dropped = 0;
        while self.queue.len() > max {
            if self.queue.try_pop_if(T::can_be_dropped).is_none() {
                // Empty, or the oldest item is one that must be delivered.
                break;
            }
            dropped += 1;
        }

        if dropped > 0 {
            self.record_drops(dropped, "buffer full");
        }
    }

    /// Put an input at the front of the queue so it's the next one
    /// [returned](Self::next_input). The buffer ceiling isn't enforced.
    pub fn queue_input_front(&self, item: T) {
        self.queue.push_front(item);
    }

    /// Block until there's an input, then return it. When [dropping is
    /// enabled](Self::drop_inputs) newer inputs replace it for as long as the
    /// current one [can be dropped](Droppable::can_be_dropped).
    pub fn next_input(&self) -> T {
        let mut item = self.queue.wait_and_pop();

        if !self.drop_inputs() {
            return item;
        }

        let mut dropped = 0;
        while item.can_be_dropped() {
            match self.queue.try_pop() {
                Some(newer) => {
                    item = newer;
                    dropped += 1;
                }
                None => break,
            }
        }

        if dropped > 0 {
            self.record_drops(dropped, "consumer behind");
        }

        item
    }

    /// Discard every queued input without counting them as dropped.
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Whether the queue was empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The number of queued inputs at the time of the call.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// The most inputs that can be waiting at once (default
    /// [DEFAULT_MAX_INPUTS_TO_BUFFER]).
    pub fn max_inputs_to_buffer(&self) -> usize {
        self.max_inputs_to_buffer.load(Ordering::Relaxed)
    }

    /// Set the buffer ceiling. It's enforced on the next [Self::queue_input].
    /// A value of `0` is treated as `1`.
    pub fn set_max_inputs_to_buffer(&self, max: usize) {
        self.max_inputs_to_buffer.store(max.max(1), Ordering::Relaxed);
    }

    /// Whether [Self::next_input] skips stale inputs (default `true`).
    pub fn drop_inputs(&self) -> bool {
        self.drop_inputs.load(Ordering::Relaxed)
    }

    pub fn set_drop_inputs(&self, drop_inputs: bool) {
        self.drop_inputs.store(drop_inputs, Ordering::Relaxed);
    }

    pub fn set_warn_when_dropping(&self, warn: bool) {
        self.warn_when_dropping.store(warn, Ordering::Relaxed);
    }

    /// How many inputs have been discarded over this throttle's lifetime.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drops(&self, count: u64, reason: &str) {
        let total = self.dropped.fetch_add(count, Ordering::Relaxed) + count;

        if self.warn_when_dropping.load(Ordering::Relaxed) {
            debug_log_warning!(
                "{}: dropped {count} input(s) ({reason}), {total} total.",
                self.name
            );
        } else {
            debug_log_trace!(
                "{}: dropped {count} input(s) ({reason}), {total} total.",
                self.name
            );
        }
    }
}
