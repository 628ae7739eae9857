//! Fixed-capacity handoff queue that moves items by swapping.
//!
//! The producer hands in a filled item and gets an empty slot back; the
//! consumer hands in an empty item and gets the oldest filled one. Slots are
//! allocated once at construction, so steady-state traffic never allocates.
//! All state sits behind one mutex, which makes every method callable through
//! a shared reference from either thread.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use derive_more::Debug;

/// Shape check applied to every item entering or leaving the queue.
pub trait ItemVerifier<T> {
    fn verify(&self, item: &T) -> bool;
}

/// Verifier that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<T> ItemVerifier<T> for AcceptAll {
    fn verify(&self, _item: &T) -> bool {
        true
    }
}

impl<T, F: Fn(&T) -> bool> ItemVerifier<T> for F {
    fn verify(&self, item: &T) -> bool {
        self(item)
    }
}

#[derive(Debug)]
struct Slots<T> {
    #[debug(skip)]
    items: Vec<T>,
    next_write: usize,
    next_read: usize,
    len: usize,
}

impl<T> Slots<T> {
    fn check_cursors(&self) {
        let capacity = self.items.len();
        debug_assert!(self.len <= capacity);
        if capacity > 0 {
            debug_assert_eq!((self.next_read + self.len) % capacity, self.next_write);
        }
    }
}

/// A bounded FIFO of pre-allocated items exchanged by `mem::swap`.
#[derive(Debug)]
pub struct SwapQueue<T, V = AcceptAll> {
    slots: Mutex<Slots<T>>,
    #[debug(skip)]
    verifier: V,
}

impl<T: Default> SwapQueue<T> {
    /// Creates a queue of `capacity` default-constructed slots.
    pub fn new(capacity: usize) -> Self {
        Self::with_factory(capacity, T::default)
    }
}

impl<T> SwapQueue<T> {
    /// Creates a queue whose slots are produced by `factory`, e.g. vectors with
    /// reserved capacity.
    pub fn with_factory(capacity: usize, factory: impl FnMut() -> T) -> Self {
        Self::with_verifier(capacity, factory, AcceptAll)
    }
}

impl<T, V: ItemVerifier<T>> SwapQueue<T, V> {
    /// Creates a queue whose slots, and every item swapped through it, must
    /// satisfy `verifier`.
    pub fn with_verifier(capacity: usize, mut factory: impl FnMut() -> T, verifier: V) -> Self {
        let items: Vec<T> = (0..capacity).map(|_| factory()).collect();
        for item in &items {
            assert!(verifier.verify(item), "queue slot fails verification");
        }
        Self {
            slots: Mutex::new(Slots {
                items,
                next_write: 0,
                next_read: 0,
                len: 0,
            }),
            verifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `item` to the back of the queue and leaves an empty slot in its
    /// place. Returns `false` and leaves `item` untouched when full.
    pub fn insert(&self, item: &mut T) -> bool {
        debug_assert!(self.verifier.verify(item), "inserted item fails verification");
        let mut slots = self.lock();
        let capacity = slots.items.len();
        if slots.len == capacity {
            return false;
        }
        let at = slots.next_write;
        mem::swap(item, &mut slots.items[at]);
        slots.next_write = (at + 1) % capacity;
        slots.len += 1;
        slots.check_cursors();
        drop(slots);
        debug_assert!(self.verifier.verify(item), "returned slot fails verification");
        true
    }

    /// Moves the oldest item into `item`, leaving `item`'s old contents in the
    /// queue as a spare slot. Returns `false` and leaves `item` untouched when
    /// empty.
    pub fn remove(&self, item: &mut T) -> bool {
        debug_assert!(self.verifier.verify(item), "spare item fails verification");
        let mut slots = self.lock();
        if slots.len == 0 {
            return false;
        }
        let capacity = slots.items.len();
        let at = slots.next_read;
        mem::swap(item, &mut slots.items[at]);
        slots.next_read = (at + 1) % capacity;
        slots.len -= 1;
        slots.check_cursors();
        drop(slots);
        debug_assert!(self.verifier.verify(item), "removed item fails verification");
        true
    }

    /// Drops all queued content. Slots keep their allocations.
    pub fn clear(&self) {
        let mut slots = self.lock();
        slots.next_read = slots.next_write;
        slots.len = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().items.len()
    }
}
