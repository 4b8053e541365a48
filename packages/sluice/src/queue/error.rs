// queue error types.

use thiserror::Error;


// ==== base error types ====


/// Error for trying to use a queue which has been disposed
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("the queue has been disposed")]
pub struct DisposedError;

/// Error for trying to add to a queue after adding was completed
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("adding to the queue has been completed")]
pub struct AddingCompletedError;

/// Error for the backing container refusing an item, such as a bounded container being full
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("the backing container rejected the item")]
pub struct RejectedError;

/// Error for waiting on a queue which had already fully completed before the wait began
///
/// This indicates caller misuse: the caller was already told the queue is over.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("the queue has already fully completed")]
pub struct AlreadyCompletedError;

/// Error for waiting on a queue which completed adding while empty, so no item will ever arrive
///
/// This is the normal exhaustion path.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("adding has completed, so there will not be any more available items")]
pub struct NoMoreItemsError;

/// Error for a wait or take being cancelled through a caller-supplied token
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("the operation was cancelled")]
pub struct CancelledError;

/// Error for a take losing the race for the last items of a queue that then completed
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("the queue completed before an item could be taken")]
pub struct CompletedError;


// ==== compound error types ====


macro_rules! compound_from {
    ($compound:ident {$(
        $variant:ident($inner:ty),
    )*})=>{$(
        impl From<$inner> for $compound {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    )*};
}

/// Reason an item could not be added to a queue
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TryAddErrorCause {
    /// The queue was disposed
    #[error(transparent)]
    Disposed(DisposedError),
    /// Adding to the queue was already completed
    #[error(transparent)]
    AddingCompleted(AddingCompletedError),
    /// The backing container refused the item
    #[error(transparent)]
    Rejected(RejectedError),
}

compound_from!(TryAddErrorCause {
    Disposed(DisposedError),
    AddingCompleted(AddingCompletedError),
    Rejected(RejectedError),
});

/// Error for trying to add to a queue, handing the item back
#[derive(Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("failed to add item: {cause}")]
pub struct TryAddError<T> {
    /// The item that could not be added
    pub item: T,
    /// The reason the item could not be added
    pub cause: TryAddErrorCause,
}

impl<T> std::fmt::Debug for TryAddError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // items need not be Debug
        f.debug_struct("TryAddError")
            .field("cause", &self.cause)
            .finish_non_exhaustive()
    }
}

/// Error for waiting for an item to become available
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum WaitError {
    /// The queue was disposed
    #[error(transparent)]
    Disposed(DisposedError),
    /// The queue had already fully completed before waiting began
    #[error(transparent)]
    AlreadyCompleted(AlreadyCompletedError),
    /// Adding completed while the queue was empty
    #[error(transparent)]
    NoMoreItems(NoMoreItemsError),
    /// The caller's token was cancelled
    #[error(transparent)]
    Cancelled(CancelledError),
}

compound_from!(WaitError {
    Disposed(DisposedError),
    AlreadyCompleted(AlreadyCompletedError),
    NoMoreItems(NoMoreItemsError),
    Cancelled(CancelledError),
});

impl WaitError {
    /// Whether this error means the queue will never produce another item
    ///
    /// Exhaustion travels through the same channel as caller cancellation. This is how the two
    /// are told apart without inspecting queue state.
    pub fn is_exhaustion(&self) -> bool {
        !matches!(self, WaitError::Cancelled(_))
    }
}

/// Error for taking an item with waiting
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TakeError {
    /// Waiting for an item failed
    #[error(transparent)]
    Wait(WaitError),
    /// The queue completed while this take was racing other consumers for the last items
    #[error(transparent)]
    Completed(CompletedError),
}

compound_from!(TakeError {
    Wait(WaitError),
    Completed(CompletedError),
});

impl From<DisposedError> for TakeError {
    fn from(inner: DisposedError) -> Self {
        TakeError::Wait(inner.into())
    }
}

impl From<CancelledError> for TakeError {
    fn from(inner: CancelledError) -> Self {
        TakeError::Wait(inner.into())
    }
}

impl TakeError {
    /// Whether this error means the queue will never produce another item
    pub fn is_exhaustion(&self) -> bool {
        match self {
            TakeError::Wait(e) => e.is_exhaustion(),
            TakeError::Completed(_) => true,
        }
    }
}

/// Error for a blocking take with a deadline
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TryTakeError {
    /// The take failed for a reason other than time running out
    #[error(transparent)]
    Take(TakeError),
    /// No item could be taken by the deadline
    #[error(transparent)]
    WouldBlock(WouldBlockError),
}

/// Error for an operation not completing immediately or by the specified deadline
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("the operation did not complete in time")]
pub struct WouldBlockError;

compound_from!(TryTakeError {
    Take(TakeError),
    WouldBlock(WouldBlockError),
});
