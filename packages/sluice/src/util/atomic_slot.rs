//! Low-level concurrency utility.

use crossbeam_utils::atomic::AtomicCell;
use std::fmt::{self, Formatter, Debug};


/// Like an atomic `Option<T>` that can be filled and `take`n repeatedly without locking.
///
/// The value is boxed, so every exchange is a single pointer-width atomic instruction regardless
/// of the size or alignment of `T`.
pub struct AtomicSlot<T> {
    val: AtomicCell<Option<Box<T>>>,
}

impl<T> AtomicSlot<T> {
    /// Construct with a value.
    pub fn some(val: T) -> Self {
        AtomicSlot { val: AtomicCell::new(Some(Box::new(val))) }
    }

    /// Construct without a value.
    pub const fn none() -> Self {
        AtomicSlot { val: AtomicCell::new(None) }
    }

    /// Atomically take the value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.val.take().map(|val| *val)
    }

    /// Atomically store a value, returning whatever the slot held before.
    pub fn replace(&self, val: T) -> Option<T> {
        self.val.swap(Some(Box::new(val))).map(|val| *val)
    }

    /// Atomically store a value, dropping whatever the slot held before.
    pub fn put(&self, val: T) {
        drop(self.replace(val));
    }

    /// Empty the slot, dropping its value if there was one.
    pub fn clear(&self) {
        drop(self.val.take());
    }

    /// Whether exchanges of this slot's value compile down to native atomic instructions.
    ///
    /// True on every target with pointer-width atomics.
    pub fn is_lock_free() -> bool {
        AtomicCell::<Option<Box<T>>>::is_lock_free()
    }
}

impl<T> Default for AtomicSlot<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Debug for AtomicSlot<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // reading the value would require taking it
        f.debug_struct("AtomicSlot").finish_non_exhaustive()
    }
}
