//! This module contains [Signal], a multi-subscriber observer list.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifies one subscription to a [Signal] so it can be
/// [detached](Signal::detach) later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u64);

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    slots: Vec<(SlotId, Slot<T>)>,
}

/// A list of callbacks ("slots") that all get called with a value whenever the
/// signal is [emitted](Self::emit).
///
/// Cloning a signal gives another handle to the *same* slot list, so one side
/// can hand a clone to a worker thread that emits while the other side keeps
/// attaching and detaching.
///
/// Slots run on whichever thread emits, in the order they were attached. The
/// slot list isn't locked while they run, so a slot may attach or detach
/// (changes take effect on the next emission).
pub struct Signal<T> {
    inner: Arc<Mutex<Slots<T>>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    /// Subscribe `slot`. Returns an ID that can be passed to [Self::detach].
    pub fn attach<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = SlotId(inner.next_id);
        inner.next_id += 1;
        inner.slots.push((id, Arc::new(slot)));
        id
    }

    /// Unsubscribe a slot. Returns `false` if it wasn't attached.
    pub fn detach(&self, id: SlotId) -> bool {
        let mut inner = self.lock();
        let len_before = inner.slots.len();
        inner.slots.retain(|(slot_id, _)| *slot_id != id);
        inner.slots.len() != len_before
    }

    /// Remove every slot.
    pub fn detach_all(&self) {
        self.lock().slots.clear();
    }

    /// Call every attached slot with `value`.
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self
            .lock()
            .slots
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();

        for slot in slots {
            slot(value);
        }
    }

    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        // A slot can't panic while this lock is held (slots run after it's
        // released), so a poisoned list is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slot_count", &self.slot_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn slots_run_in_attach_order() {
        let signal = Signal::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = log.clone();
            signal.attach(move |v| log.lock().unwrap().push(format!("{name}{v}")));
        }

        signal.emit(&1);

        assert_eq!(*log.lock().unwrap(), ["a1", "b1", "c1"]);
    }

    #[test]
    fn detach_works() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let id = {
            let count = count.clone();
            signal.attach(move |_| {
                count.fetch_add(1, Ordering::Relaxed);
            })
        };

        signal.emit(&());
        assert!(signal.detach(id));
        assert!(!signal.detach(id));
        signal.emit(&());

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(signal.slot_count(), 0);
    }

    #[test]
    fn clones_share_slots() {
        let signal = Signal::<u8>::new();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count = count.clone();
            signal.attach(move |v| {
                count.fetch_add(*v as usize, Ordering::Relaxed);
            });
        }

        let remote = signal.clone();
        thread::spawn(move || remote.emit(&5)).join().unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn a_slot_can_detach_itself() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id_cell = Arc::new(Mutex::new(None));

        let id = {
            let signal = signal.clone();
            let count = count.clone();
            let id_cell = id_cell.clone();
            signal.clone().attach(move |_| {
                count.fetch_add(1, Ordering::Relaxed);
                if let Some(id) = *id_cell.lock().unwrap() {
                    signal.detach(id);
                }
            })
        };
        *id_cell.lock().unwrap() = Some(id);

        signal.emit(&());
        signal.emit(&());

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
