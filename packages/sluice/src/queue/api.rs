// exposed API of queues

use super::{
    container::{Container, Fifo, Snapshot},
    consumer::Consumer,
    core::Shared,
    error::*,
    polling::{Timeout, poll, block_on},
};
use std::{
    fmt::{self, Formatter, Debug},
    hash::{Hash, Hasher},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;


/// Multi-producer multi-consumer queue with observable completion
///
/// Producers add items and eventually call [`complete_adding`](Self::complete_adding). The queue
/// becomes _completed_ once adding is completed and the last item has been taken, which happens
/// exactly once and is permanent. Consumers drain it either directly or through
/// [`Consumer`] cursors.
///
/// This is a handle: clones refer to the same queue, and compare equal. Items are stored in a
/// pluggable [`Container`], [`Fifo`] by default.
pub struct AsyncQueue<T, C = Fifo<T>>(Arc<Shared<T, C>>);

impl<T: Send> AsyncQueue<T> {
    /// Construct an empty first-in-first-out queue
    pub fn new() -> Self {
        Self::with_container(Fifo::new())
    }

    /// Construct a first-in-first-out queue pre-loaded with items
    pub fn from_items<I: IntoIterator<Item = T>>(items: I) -> Self {
        Self::with_container(items.into_iter().collect())
    }
}

impl<T: Send> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: Container<T>> AsyncQueue<T, C> {
    /// Construct around an existing container
    ///
    /// Items the container already holds are available to take immediately.
    pub fn with_container(container: C) -> Self {
        AsyncQueue(Arc::new(Shared::new(container)))
    }

    /// Construct around an existing container, then add items to it
    pub fn from_items_in<I: IntoIterator<Item = T>>(container: C, items: I) -> Self {
        let queue = Self::with_container(container);
        // a queue this fresh can be neither disposed nor completed
        let _ = queue.0.try_add_range(items);
        queue
    }

    /// Try to add an item
    ///
    /// On failure the item is handed back inside the error. Adding wakes one waiting consumer.
    pub fn try_add(&self, item: T) -> Result<(), TryAddError<T>> {
        self.0.try_add(item)
    }

    /// Add items in order until the container rejects one, returning how many were added
    ///
    /// Returns `Ok(0)` without consuming anything if adding is already completed. The rejected
    /// item and any items after it are dropped.
    pub fn try_add_range<I: IntoIterator<Item = T>>(&self, items: I) -> Result<usize, DisposedError> {
        self.0.try_add_range(items)
    }

    /// Declare that no more items will be added
    ///
    /// Idempotent. If the queue is already empty, it becomes completed.
    pub fn complete_adding(&self) {
        self.0.complete_adding();
    }

    /// Try to take an item without blocking
    pub fn try_take(&self) -> Result<Option<T>, DisposedError> {
        self.0.check_disposed()?;
        Ok(self.0.take_elem(true))
    }

    /// Wait until an item is available to take
    ///
    /// Resolves immediately if the queue is non-empty. Otherwise suspends until an item is added,
    /// `cancel` fires ([`CancelledError`]), or adding completes ([`NoMoreItemsError`]). Fails
    /// with [`AlreadyCompletedError`] if the queue had completed before this was called.
    ///
    /// Being told an item is available does not reserve it. Another consumer may take it first.
    pub async fn wait_for_available(&self, cancel: &CancellationToken) -> Result<(), WaitError> {
        self.0.wait(cancel, false).await.map(drop)
    }

    /// Like [`wait_for_available`](Self::wait_for_available), but cancellation and exhaustion
    /// resolve to `Ok(false)`
    pub async fn try_wait_for_available(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool, WaitError> {
        match self.0.wait(cancel, false).await {
            Ok(_) => Ok(true),
            Err(WaitError::NoMoreItems(_) | WaitError::Cancelled(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Wait for an item and take it
    ///
    /// Losing a race for an item to another consumer is retried internally. Fails with
    /// [`CompletedError`] if the queue completed while this was racing for its last items.
    pub async fn take(&self, cancel: &CancellationToken) -> Result<T, TakeError> {
        self.0.take(cancel).await
    }

    /// Block the current thread until an item is available
    ///
    /// See [`wait_for_available`](Self::wait_for_available).
    pub fn wait_for_available_blocking(&self, cancel: &CancellationToken) -> Result<(), WaitError> {
        block_on(self.0.wait(cancel, false)).map(drop)
    }

    /// Block the current thread until an item can be taken
    ///
    /// See [`take`](Self::take).
    pub fn take_blocking(&self, cancel: &CancellationToken) -> Result<T, TakeError> {
        block_on(self.0.take(cancel))
    }

    /// Block the current thread until an item can be taken or a timeout elapses
    pub fn take_timeout(&self, timeout: Duration) -> Result<T, TryTakeError> {
        self.take_deadline(Instant::now() + timeout)
    }

    /// Block the current thread until an item can be taken or the deadline is reached
    pub fn take_deadline(&self, deadline: Instant) -> Result<T, TryTakeError> {
        let never = CancellationToken::new();
        match poll(self.0.take(&never), Timeout::At(deadline)) {
            Some(result) => result.map_err(TryTakeError::from),
            None => Err(WouldBlockError.into()),
        }
    }

    /// Remove all items
    ///
    /// If adding is completed, the queue becomes completed.
    pub fn clear(&self) -> Result<(), DisposedError> {
        self.0.check_disposed()?;
        self.0.clear();
        Ok(())
    }

    /// Dispose the queue
    ///
    /// Completes adding, fires completion, drops all items, and wakes all waiters. Afterwards,
    /// operations fail with [`DisposedError`] while queries report the terminal state. Disposing
    /// twice is a bug in the caller, which is logged and otherwise ignored.
    pub fn dispose(&self) {
        if !self.0.dispose() {
            error!("queue disposed more than once");
        }
    }

    /// Number of items currently in the queue
    pub fn len(&self) -> usize {
        self.0.elems().len()
    }

    /// Whether the queue currently holds no items
    pub fn is_empty(&self) -> bool {
        self.0.elems().is_empty()
    }

    /// Whether producers have declared no more items will be added
    pub fn is_adding_completed(&self) -> bool {
        self.0.is_adding_completed()
    }

    /// Whether the queue is completed: adding is completed and it has been drained
    ///
    /// This performs the completion check itself, so it may be what fires completion.
    pub fn is_completed(&self) -> bool {
        self.0.try_complete()
    }

    #[cfg(test)]
    pub(crate) fn available_permits(&self) -> usize {
        self.0.available_permits()
    }

    /// Whether the queue has been disposed
    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed()
    }

    /// Register a callback to run exactly once when the queue completes
    ///
    /// If the queue has already completed, the callback runs immediately on this thread.
    /// Otherwise it runs on whichever thread fires completion.
    pub fn on_completed<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.on_completed(Box::new(callback));
    }

    /// Wait until the queue is completed
    pub async fn completed(&self) {
        if !self.0.try_complete() {
            self.0.complete_token().cancelled().await;
        }
    }

    /// Create a consumer cursor over this queue
    pub fn consumer(&self) -> Consumer<T, C> {
        Consumer::new(self.clone())
    }
}

impl<T, C: Snapshot<T>> AsyncQueue<T, C> {
    /// Copy out the items currently in the queue, in the order they would be taken
    pub fn to_vec(&self) -> Result<Vec<T>, DisposedError> {
        self.0.check_disposed()?;
        Ok(self.0.elems().to_vec())
    }
}

impl<T, C> Clone for AsyncQueue<T, C> {
    fn clone(&self) -> Self {
        AsyncQueue(Arc::clone(&self.0))
    }
}

impl<T, C> PartialEq for AsyncQueue<T, C> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T, C> Eq for AsyncQueue<T, C> {}

impl<T, C> Hash for AsyncQueue<T, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl<T, C: Container<T>> Debug for AsyncQueue<T, C> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("AsyncQueue")
            .field("len", &self.len())
            .field("adding_completed", &self.is_adding_completed())
            .field("completed", &self.0.is_completed_flag())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T, C: Container<T>> Extend<T> for AsyncQueue<T, C> {
    /// Add items as by [`try_add_range`](AsyncQueue::try_add_range), ignoring failure
    fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) {
        let _ = self.0.try_add_range(items);
    }
}


// ==== tests ====
