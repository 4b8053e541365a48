// backing containers for queues.
//
// a queue does not itself store anything. it layers its completion state machine and availability
// signalling over one of these, which must be internally thread-safe and never block for longer
// than a short critical section.

use crossbeam_queue::{ArrayQueue, SegQueue};
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};


/// Thread-safe collection that an [`AsyncQueue`](crate::AsyncQueue) stores its items in
///
/// Ordering of takes relative to adds is whatever the container natively provides.
pub trait Container<T>: Send + Sync {
    /// Try to add an item, handing it back if the container refuses it
    fn try_add(&self, item: T) -> Result<(), T>;

    /// Try to take an item without blocking
    fn try_take(&self) -> Option<T>;

    /// Number of items currently stored
    fn len(&self) -> usize;

    /// Whether no items are currently stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all items
    fn clear(&self) {
        while self.try_take().is_some() {}
    }
}

/// Container that can produce a snapshot of its contents in take order
pub trait Snapshot<T>: Container<T> {
    /// Copy out the current contents, first-to-be-taken first
    fn to_vec(&self) -> Vec<T>;
}


// lock a std mutex, ignoring poisoning. containers never leave their contents half-modified
// across a panic, since the standard collections' push/pop don't.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}


/// First-in-first-out container, the default
#[derive(Debug, Default)]
pub struct Fifo<T>(Mutex<VecDeque<T>>);

impl<T> Fifo<T> {
    /// Construct empty
    pub fn new() -> Self {
        Fifo(Mutex::new(VecDeque::new()))
    }
}

impl<T> FromIterator<T> for Fifo<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Fifo(Mutex::new(iter.into_iter().collect()))
    }
}

impl<T: Send> Container<T> for Fifo<T> {
    fn try_add(&self, item: T) -> Result<(), T> {
        lock(&self.0).push_back(item);
        Ok(())
    }

    fn try_take(&self) -> Option<T> {
        lock(&self.0).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.0).len()
    }

    fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    fn clear(&self) {
        // swap out so the items are dropped outside the critical section
        let drained = std::mem::take(&mut *lock(&self.0));
        drop(drained);
    }
}

impl<T: Send + Clone> Snapshot<T> for Fifo<T> {
    fn to_vec(&self) -> Vec<T> {
        lock(&self.0).iter().cloned().collect()
    }
}


/// Last-in-first-out container
#[derive(Debug, Default)]
pub struct Lifo<T>(Mutex<Vec<T>>);

impl<T> Lifo<T> {
    /// Construct empty
    pub fn new() -> Self {
        Lifo(Mutex::new(Vec::new()))
    }
}

impl<T> FromIterator<T> for Lifo<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Lifo(Mutex::new(iter.into_iter().collect()))
    }
}

impl<T: Send> Container<T> for Lifo<T> {
    fn try_add(&self, item: T) -> Result<(), T> {
        lock(&self.0).push(item);
        Ok(())
    }

    fn try_take(&self) -> Option<T> {
        lock(&self.0).pop()
    }

    fn len(&self) -> usize {
        lock(&self.0).len()
    }

    fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    fn clear(&self) {
        let drained = std::mem::take(&mut *lock(&self.0));
        drop(drained);
    }
}

impl<T: Send + Clone> Snapshot<T> for Lifo<T> {
    fn to_vec(&self) -> Vec<T> {
        lock(&self.0).iter().rev().cloned().collect()
    }
}


/// Lock-free unbounded first-in-first-out container
///
/// Does not support snapshots.
#[derive(Debug, Default)]
pub struct SegFifo<T>(SegQueue<T>);

impl<T> SegFifo<T> {
    /// Construct empty
    pub fn new() -> Self {
        SegFifo(SegQueue::new())
    }
}

impl<T: Send> Container<T> for SegFifo<T> {
    fn try_add(&self, item: T) -> Result<(), T> {
        self.0.push(item);
        Ok(())
    }

    fn try_take(&self) -> Option<T> {
        self.0.pop()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}


/// Lock-free first-in-first-out container with a fixed capacity
///
/// Adds are rejected while it is full. This is the only way a queue pushes back on producers.
#[derive(Debug)]
pub struct Bounded<T>(ArrayQueue<T>);

impl<T> Bounded<T> {
    /// Construct empty with the given capacity
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Bounded(ArrayQueue::new(capacity))
    }

    /// Maximum number of items held at once
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

impl<T: Send> Container<T> for Bounded<T> {
    fn try_add(&self, item: T) -> Result<(), T> {
        self.0.push(item)
    }

    fn try_take(&self) -> Option<T> {
        self.0.pop()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
