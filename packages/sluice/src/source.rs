// the capability interface shared by everything a multiplexer can draw from.

use crate::queue::error::WaitError;
use std::{
    fmt::{self, Formatter, Debug},
    future::{Future, ready},
    marker::PhantomData,
    pin::Pin,
};
use tokio_util::sync::CancellationToken;


/// Boxed future returned by [`Source::wait_for_available`]
pub type WaitFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WaitError>> + Send + 'a>>;

/// Boxed future returned by [`Source::try_wait_for_available`]
pub type TryWaitFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Something items can be pulled from, and waited on
///
/// Implemented by [`Consumer`](crate::Consumer), [`Multiplexer`](crate::Multiplexer), and the
/// [`Empty`] sentinel. This is the seam that lets multiplexers nest.
pub trait Source<T>: Send + Sync {
    /// Whether no item is currently available
    fn is_empty(&self) -> bool;

    /// Whether this source will never produce another item
    fn is_completed(&self) -> bool;

    /// Try to pull an item without blocking
    fn try_move_next(&self) -> Option<T>;

    /// Wait until an item may be available, failing if none ever will be or `cancel` fires
    fn wait_for_available<'a>(&'a self, cancel: &'a CancellationToken) -> WaitFuture<'a>;

    /// Wait until an item may be available, resolving to false instead of failing
    fn try_wait_for_available<'a>(&'a self, cancel: &'a CancellationToken) -> TryWaitFuture<'a>;
}


/// Source that is permanently empty and completed
///
/// Never yields. Its waits resolve immediately, successfully for
/// [`wait_for_available`](Source::wait_for_available) and with false for
/// [`try_wait_for_available`](Source::try_wait_for_available).
pub struct Empty<T>(PhantomData<fn() -> T>);

impl<T> Empty<T> {
    pub const fn new() -> Self {
        Empty(PhantomData)
    }
}

impl<T> Default for Empty<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Empty<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for Empty<T> {}

impl<T> Debug for Empty<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("Empty")
    }
}

impl<T> Source<T> for Empty<T> {
    fn is_empty(&self) -> bool {
        true
    }

    fn is_completed(&self) -> bool {
        true
    }

    fn try_move_next(&self) -> Option<T> {
        None
    }

    fn wait_for_available<'a>(&'a self, _: &'a CancellationToken) -> WaitFuture<'a> {
        Box::pin(ready(Ok(())))
    }

    fn try_wait_for_available<'a>(&'a self, _: &'a CancellationToken) -> TryWaitFuture<'a> {
        Box::pin(ready(false))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::polling::block_on;

    #[test]
    fn empty_is_inert() {
        let empty = Empty::<String>::new();
        let cancel = CancellationToken::new();
        assert_eq!(std::mem::size_of_val(&empty), 0);
        assert!(empty.is_empty());
        assert!(empty.is_completed());
        assert_eq!(empty.try_move_next(), None);
        assert_eq!(block_on(empty.wait_for_available(&cancel)), Ok(()));
        assert!(!block_on(empty.try_wait_for_available(&cancel)));
    }

    #[test]
    fn empty_is_object_safe() {
        let sources: Vec<Box<dyn Source<u8>>> = vec![Box::new(Empty::new()), Box::new(Empty::new())];
        assert!(sources.iter().all(|s| s.is_completed()));
    }
}
