// shared state of a queue and its completion state machine. the exposed API is a convenience
// wrapper around this.

use super::{
    container::Container,
    error::*,
};
use crate::util::deferred::{Callback, run_or_defer};
use std::{
    future::{Future, poll_fn},
    marker::PhantomData,
    pin::pin,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{Acquire, AcqRel},
        },
        Mutex,
    },
    task::Poll,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;


// queue shared state.
pub(crate) struct Shared<T, C> {
    // storage for elements.
    elems: C,
    // one permit per element that has been added and whose availability has not yet been
    // consumed, either by a take or by a waiter that suspended on it.
    //
    // - released on every successful add.
    // - closed upon disposal, which wakes all waiters.
    permits: Semaphore,
    // fires once the queue is fully completed. parent of adding_completed.
    complete: CancellationToken,
    // fires once producers complete adding. since it's a child of complete, firing complete fires
    // this too.
    adding_completed: CancellationToken,
    // begins false. set to true exactly once, by the thread that gets to fire completion.
    completed: AtomicBool,
    // begins false. set to true exactly once, by the thread that gets to dispose.
    disposed: AtomicBool,
    // callbacks to run upon completion. emptied when they run.
    on_completed: Mutex<Vec<Callback>>,
    _item: PhantomData<fn() -> T>,
}

// how a wait for availability resolved successfully.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Available {
    // the container was observed non-empty without suspending.
    Observed,
    // the waiter suspended and kept the permit it woke with.
    Permit,
}

impl<T, C: Container<T>> Shared<T, C> {
    // construct around a container, with one permit per element it already holds.
    pub(crate) fn new(elems: C) -> Self {
        let permits = Semaphore::new(elems.len());
        let complete = CancellationToken::new();
        let adding_completed = complete.child_token();
        Shared {
            elems,
            permits,
            complete,
            adding_completed,
            completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            on_completed: Mutex::new(Vec::new()),
            _item: PhantomData,
        }
    }

    pub(crate) fn elems(&self) -> &C {
        &self.elems
    }

    pub(crate) fn complete_token(&self) -> &CancellationToken {
        &self.complete
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Acquire)
    }

    pub(crate) fn is_adding_completed(&self) -> bool {
        self.adding_completed.is_cancelled()
    }

    // completed flag without re-checking.
    pub(crate) fn is_completed_flag(&self) -> bool {
        self.completed.load(Acquire)
    }

    #[cfg(test)]
    pub(crate) fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub(crate) fn check_disposed(&self) -> Result<(), DisposedError> {
        if self.is_disposed() {
            Err(DisposedError)
        } else {
            Ok(())
        }
    }

    // the completion check. completion is a pure function of whether adding is completed and
    // whether the container is empty, evaluated at the tail of every mutating operation. returns
    // whether the queue is completed.
    pub(crate) fn try_complete(&self) -> bool {
        if self.is_completed_flag() {
            return true;
        }
        if !self.is_adding_completed() || !self.elems.is_empty() {
            return false;
        }
        self.fire_completed();
        true
    }

    // fire completion if no other thread has yet. concurrent observers of the same transition
    // race on the swap, and only the winner runs callbacks.
    fn fire_completed(&self) {
        if self.completed.swap(true, AcqRel) {
            return;
        }
        self.complete.cancel();
        let callbacks = std::mem::take(&mut *self.lock_callbacks());
        debug!(callbacks = callbacks.len(), "queue completed");
        run_or_defer(callbacks);
    }

    fn lock_callbacks(&self) -> std::sync::MutexGuard<'_, Vec<Callback>> {
        self.on_completed.lock().unwrap_or_else(|e| e.into_inner())
    }

    // register a callback to run upon completion, or run it now if already completed.
    pub(crate) fn on_completed(&self, callback: Callback) {
        let mut lock = self.lock_callbacks();
        // the completing thread sets the flag before taking this lock, so checking under the lock
        // can't miss a completion that's already drained the list.
        if self.is_completed_flag() {
            drop(lock);
            callback();
        } else {
            lock.push(callback);
        }
    }

    // add one element and release its permit.
    pub(crate) fn try_add(&self, item: T) -> Result<(), TryAddError<T>> {
        if self.is_disposed() {
            return Err(TryAddError { item, cause: DisposedError.into() });
        }
        if self.is_adding_completed() {
            return Err(TryAddError { item, cause: AddingCompletedError.into() });
        }
        self.elems.try_add(item)
            .map_err(|item| TryAddError { item, cause: RejectedError.into() })?;
        self.permits.add_permits(1);
        self.try_complete();
        Ok(())
    }

    // add elements until the container rejects one, then release that many permits at once.
    //
    // the rejected element, and any after it, are dropped.
    pub(crate) fn try_add_range<I>(&self, items: I) -> Result<usize, DisposedError>
    where
        I: IntoIterator<Item = T>,
    {
        self.check_disposed()?;
        if self.is_adding_completed() {
            return Ok(0);
        }
        let mut count = 0;
        for item in items {
            if self.elems.try_add(item).is_err() {
                break;
            }
            count += 1;
        }
        if count > 0 {
            self.permits.add_permits(count);
        }
        trace!(count, "added range");
        self.try_complete();
        Ok(count)
    }

    pub(crate) fn complete_adding(&self) {
        if !self.is_adding_completed() {
            self.adding_completed.cancel();
            debug!(remaining = self.elems.len(), "queue adding completed");
        }
        self.try_complete();
    }

    // take an element, if any. consumes the element's permit unless the caller already consumed
    // one while waiting.
    pub(crate) fn take_elem(&self, consume_permit: bool) -> Option<T> {
        let item = self.elems.try_take();
        if item.is_some() && consume_permit {
            // the permit may already have gone to a waiter, which then just retries
            if let Ok(permit) = self.permits.try_acquire() {
                permit.forget();
            }
        }
        self.try_complete();
        item
    }

    pub(crate) fn clear(&self) {
        // stale permits left behind only cause waiters to retry once each
        self.elems.clear();
        self.try_complete();
    }

    // wait until an element is available or the wait fails.
    //
    // if consume is true and the wait suspends, the permit it wakes with is kept, and the caller
    // must take an element without consuming another. otherwise it goes back to the semaphore,
    // so the permit count keeps matching the element count. a permit found with no element to
    // match it is stale, as the element's taker couldn't get it, so it's kept and the wait goes on.
    pub(crate) async fn wait(
        &self,
        cancel: &CancellationToken,
        consume: bool,
    ) -> Result<Available, WaitError> {
        loop {
            self.check_disposed()?;
            if self.is_completed_flag() {
                return Err(AlreadyCompletedError.into());
            }
            if !self.elems.is_empty() {
                return Ok(Available::Observed);
            }
            if self.is_adding_completed() {
                return Err(NoMoreItemsError.into());
            }

            let mut acquire = pin!(self.permits.acquire());
            let mut cancelled = pin!(cancel.cancelled());
            let mut adding_completed = pin!(self.adding_completed.cancelled());
            let permit = poll_fn(|cx| {
                // a permit which is already available wins over any cancellation
                if let Poll::Ready(result) = acquire.as_mut().poll(cx) {
                    // only disposal closes the semaphore
                    return Poll::Ready(result.map_err(|_| WaitError::from(DisposedError)));
                }
                if cancelled.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(Err(CancelledError.into()));
                }
                if adding_completed.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(Err(NoMoreItemsError.into()));
                }
                Poll::Pending
            }).await?;

            if self.elems.is_empty() {
                trace!("waiter absorbed stale permit");
                permit.forget();
                continue;
            }
            if consume {
                trace!("waiter consumed permit");
                permit.forget();
                return Ok(Available::Permit);
            }
            return Ok(Available::Observed);
        }
    }

    // wait for and take an element.
    pub(crate) async fn take(&self, cancel: &CancellationToken) -> Result<T, TakeError> {
        loop {
            let available = self.wait(cancel, true).await?;
            self.check_disposed()?;
            if let Some(item) = self.take_elem(available != Available::Permit) {
                return Ok(item);
            }
            // lost the race for the element to another consumer
            if self.try_complete() {
                return Err(CompletedError.into());
            }
            if cancel.is_cancelled() {
                return Err(CancelledError.into());
            }
        }
    }

    // dispose the queue. returns false, and does nothing else, if already disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.disposed.swap(true, AcqRel) {
            return false;
        }
        self.adding_completed.cancel();
        self.fire_completed();
        self.elems.clear();
        self.permits.close();
        debug!("queue disposed");
        true
    }
}
