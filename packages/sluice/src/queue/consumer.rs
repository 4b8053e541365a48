// consumer cursor over a queue.

use super::{
    api::AsyncQueue,
    container::{Container, Fifo},
    polling::block_on,
};
use crate::{
    source::{Source, WaitFuture, TryWaitFuture},
    util::atomic_slot::AtomicSlot,
};
use std::{
    fmt::{self, Formatter, Debug},
    hash::{Hash, Hasher},
    iter::FusedIterator,
    ops::Deref,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{Acquire, Release},
        },
        Arc,
    },
};
use tokio_util::sync::CancellationToken;


/// Pull-based cursor over an [`AsyncQueue`]
///
/// [`move_next`](Self::move_next) and its async twin take the next item into the consumer's
/// current slot, from which [`current`](Self::current) takes it out. Iteration ends once the
/// queue is completed or disposed, or once the consumer's bound cancellation token fires.
///
/// Consumers of the same queue compare equal.
pub struct Consumer<T, C = Fifo<T>> {
    queue: AsyncQueue<T, C>,
    current: AtomicSlot<T>,
    // whether an iterator or stream is currently driving this consumer
    driven: AtomicBool,
    cancel: CancellationToken,
}

impl<T, C: Container<T>> Consumer<T, C> {
    /// Construct a cursor over the given queue
    pub fn new(queue: AsyncQueue<T, C>) -> Self {
        Consumer {
            queue,
            current: AtomicSlot::none(),
            driven: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Bind a cancellation token which ends iteration once it fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The queue this consumes from
    pub fn queue(&self) -> &AsyncQueue<T, C> {
        &self.queue
    }

    /// Try to take the next item from the queue without blocking
    ///
    /// Returns `None` if the queue is empty or disposed. Does not touch the current slot.
    pub fn try_move_next(&self) -> Option<T> {
        self.queue.try_take().ok().flatten()
    }

    /// Wait for the next item and hold it as current
    ///
    /// Returns false once no item will ever arrive, because the queue is completed or disposed,
    /// or because the bound cancellation token fired.
    pub async fn move_next_async(&self) -> bool {
        match self.queue.take(&self.cancel).await {
            Ok(item) => {
                self.current.put(item);
                true
            }
            Err(e) => {
                trace!(exhausted = e.is_exhaustion(), "consumer finished: {}", e);
                false
            }
        }
    }

    /// Block until the next item is held as current
    ///
    /// See [`move_next_async`](Self::move_next_async).
    pub fn move_next(&self) -> bool {
        block_on(self.move_next_async())
    }

    /// Take the current item out, leaving the slot empty
    pub fn current(&self) -> Option<T> {
        self.current.take()
    }

    /// Drop the current item, if any
    pub fn reset(&self) {
        self.current.clear();
    }

    /// Wait for and return the next item
    pub async fn next_async(&self) -> Option<T> {
        if self.move_next_async().await {
            self.current()
        } else {
            None
        }
    }

    /// Blocking iterator over the remaining items
    ///
    /// If this consumer is already being driven by another iterator or stream, the returned
    /// iterator drives a fresh consumer of the same queue instead, so the two never share a
    /// current slot.
    pub fn iter(&self) -> ConsumerIter<'_, T, C> {
        ConsumerIter { driver: self.driver() }
    }

    /// Stream of the remaining items
    ///
    /// Drives this consumer in the same way as [`iter`](Self::iter).
    #[cfg(feature = "futures")]
    pub fn stream(&self) -> ConsumerStream<'_, T, C> {
        ConsumerStream {
            driver: self.driver(),
            next: None,
            terminated: false,
        }
    }

    fn driver(&self) -> Driver<'_, T, C> {
        if self.driven.compare_exchange(false, true, Acquire, Acquire).is_ok() {
            Driver::Claimed(self)
        } else {
            trace!("consumer already driven, driving a fresh one");
            let fresh = Consumer::new(self.queue.clone()).with_cancellation(self.cancel.clone());
            Driver::Fresh(Arc::new(fresh))
        }
    }
}

impl<T, C> PartialEq for Consumer<T, C> {
    fn eq(&self, other: &Self) -> bool {
        self.queue == other.queue
    }
}

impl<T, C> Eq for Consumer<T, C> {}

impl<T, C> Hash for Consumer<T, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.queue.hash(state);
    }
}

impl<T, C: Container<T>> Debug for Consumer<T, C> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .field("driven", &self.driven.load(Acquire))
            .finish_non_exhaustive()
    }
}

impl<T: Send, C: Container<T>> Source<T> for Consumer<T, C> {
    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn is_completed(&self) -> bool {
        self.queue.is_completed()
    }

    fn try_move_next(&self) -> Option<T> {
        Consumer::try_move_next(self)
    }

    fn wait_for_available<'a>(&'a self, cancel: &'a CancellationToken) -> WaitFuture<'a> {
        Box::pin(self.queue.wait_for_available(cancel))
    }

    fn try_wait_for_available<'a>(&'a self, cancel: &'a CancellationToken) -> TryWaitFuture<'a> {
        Box::pin(async move {
            matches!(self.queue.try_wait_for_available(cancel).await, Ok(true))
        })
    }
}


// ==== drivers ====


// consumer an iterator or stream is driving.
enum Driver<'a, T, C> {
    // the consumer the iterator was created from, whose driven flag we hold.
    Claimed(&'a Consumer<T, C>),
    // a fresh consumer of the same queue.
    Fresh(Arc<Consumer<T, C>>),
}

impl<'a, T, C> Deref for Driver<'a, T, C> {
    type Target = Consumer<T, C>;

    fn deref(&self) -> &Consumer<T, C> {
        match self {
            Driver::Claimed(consumer) => consumer,
            Driver::Fresh(consumer) => consumer,
        }
    }
}

impl<'a, T, C> Drop for Driver<'a, T, C> {
    fn drop(&mut self) {
        if let Driver::Claimed(consumer) = self {
            consumer.driven.store(false, Release);
        }
    }
}

/// Blocking iterator over a [`Consumer`], see [`Consumer::iter`]
pub struct ConsumerIter<'a, T, C = Fifo<T>> {
    driver: Driver<'a, T, C>,
}

impl<'a, T, C: Container<T>> Iterator for ConsumerIter<'a, T, C> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        block_on(self.driver.next_async())
    }
}

// completion, disposal, and cancellation are all permanent
impl<'a, T, C: Container<T>> FusedIterator for ConsumerIter<'a, T, C> {}

#[cfg(feature = "futures")]
pub use self::stream::ConsumerStream;

#[cfg(feature = "futures")]
mod stream {
    use super::*;
    use std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll, ready},
    };

    type NextFut<'a, T> = Pin<Box<dyn Future<Output = Option<T>> + Send + 'a>>;

    /// Stream over a [`Consumer`], see [`Consumer::stream`]
    pub struct ConsumerStream<'a, T, C = Fifo<T>> {
        pub(super) driver: Driver<'a, T, C>,
        pub(super) next: Option<NextFut<'a, T>>,
        pub(super) terminated: bool,
    }

    impl<'a, T: Send, C: Container<T>> Driver<'a, T, C> {
        fn next_fut(&self) -> NextFut<'a, T> {
            match self {
                &Driver::Claimed(consumer) => Box::pin(consumer.next_async()),
                Driver::Fresh(consumer) => {
                    let consumer = Arc::clone(consumer);
                    Box::pin(async move { consumer.next_async().await })
                }
            }
        }
    }

    impl<'a, T: Send, C: Container<T>> futures::Stream for ConsumerStream<'a, T, C> {
        type Item = T;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
            let this = self.get_mut();
            if this.terminated {
                return Poll::Ready(None);
            }
            let driver = &this.driver;
            let next = this.next.get_or_insert_with(|| driver.next_fut());
            let item = ready!(next.as_mut().poll(cx));
            this.next = None;
            this.terminated = item.is_none();
            Poll::Ready(item)
        }
    }

    impl<'a, T: Send, C: Container<T>> futures::stream::FusedStream for ConsumerStream<'a, T, C> {
        fn is_terminated(&self) -> bool {
            self.terminated
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::container::Lifo;
    use std::{
        collections::HashSet,
        thread,
        time::Duration,
    };

    #[test]
    fn drains_then_reports_exhaustion() {
        let q = AsyncQueue::from_items([1, 2, 3]);
        q.complete_adding();
        let c = q.consumer();
        for i in 1..=3 {
            assert!(c.move_next());
            assert_eq!(c.current(), Some(i));
            // taking the current item empties the slot
            assert_eq!(c.current(), None);
        }
        assert!(!c.move_next());
        assert!(!c.move_next());
        assert!(q.is_completed());
    }

    #[test]
    fn try_move_next_bypasses_current_slot() {
        let q = AsyncQueue::from_items(["a", "b"]);
        let c = q.consumer();
        assert_eq!(c.try_move_next(), Some("a"));
        assert_eq!(c.current(), None);
        q.dispose();
        assert_eq!(c.try_move_next(), None);
        assert!(!c.move_next());
    }

    #[test]
    fn reset_drops_current() {
        let q = AsyncQueue::from_items([String::from("x")]);
        let c = q.consumer();
        assert!(c.move_next());
        c.reset();
        assert_eq!(c.current(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn consumers_of_same_queue_are_equal() {
        let q1 = AsyncQueue::<u8>::new();
        let q2 = AsyncQueue::<u8>::new();
        assert_eq!(q1.consumer(), q1.consumer());
        assert_eq!(q1.consumer(), q1.clone().consumer());
        assert_ne!(q1.consumer(), q2.consumer());

        let set = [q1.consumer(), q1.consumer(), q2.consumer()]
            .into_iter()
            .collect::<HashSet<_>>();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn iter_collects_in_container_order() {
        let q = AsyncQueue::from_items_in(Lifo::new(), [1, 2, 3]);
        q.complete_adding();
        assert_eq!(q.consumer().iter().collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn second_iter_drives_fresh_consumer() {
        let q = AsyncQueue::from_items(0..4);
        q.complete_adding();
        let c = q.consumer();

        let mut first = c.iter();
        assert!(matches!(first.driver, Driver::Claimed(_)));
        assert_eq!(first.next(), Some(0));
        {
            let mut second = c.iter();
            assert!(matches!(second.driver, Driver::Fresh(_)));
            assert_eq!(second.next(), Some(1));
        }
        assert_eq!(first.next(), Some(2));
        drop(first);

        // guard released
        let mut third = c.iter();
        assert!(matches!(third.driver, Driver::Claimed(_)));
        assert_eq!(third.next(), Some(3));
        assert_eq!(third.next(), None);
    }

    #[test]
    fn iter_follows_producer_thread() {
        let q = AsyncQueue::new();
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    q.try_add(i).unwrap();
                    if i % 10 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                q.complete_adding();
            })
        };
        let c = q.consumer();
        assert_eq!(c.iter().collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
        producer.join().unwrap();
    }

    #[test]
    fn bound_cancellation_ends_iteration() {
        let q = AsyncQueue::<u32>::new();
        let cancel = CancellationToken::new();
        let c = q.consumer().with_cancellation(cancel.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        assert!(!c.move_next());
        canceller.join().unwrap();
        // the queue itself is untouched
        assert!(!q.is_adding_completed());
        assert!(!q.is_completed());
    }

    #[tokio::test]
    async fn next_async_and_source_waits() {
        let q = AsyncQueue::new();
        let c = q.consumer();
        let never = CancellationToken::new();

        q.try_add(7).unwrap();
        assert!(!Source::is_empty(&c));
        assert_eq!(c.wait_for_available(&never).await, Ok(()));
        assert_eq!(c.next_async().await, Some(7));

        q.complete_adding();
        assert!(Source::is_completed(&c));
        assert!(!c.try_wait_for_available(&never).await);
        assert_eq!(c.next_async().await, None);
    }

    #[tokio::test]
    async fn source_wait_then_try_move_next_keeps_permits_matched() {
        let q = AsyncQueue::new();
        let c = Arc::new(q.consumer());
        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move {
                c.try_wait_for_available(&CancellationToken::new()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.try_add(1).unwrap();
        q.try_add(2).unwrap();
        assert!(waiter.await.unwrap());
        assert_eq!(c.try_move_next(), Some(1));
        assert_eq!(q.available_permits(), q.len());

        // the remaining item is still reachable through a suspending take
        q.complete_adding();
        assert!(c.move_next_async().await);
        assert_eq!(c.current(), Some(2));
        assert_eq!(q.available_permits(), 0);
        assert!(q.is_completed());
    }

    #[cfg(feature = "futures")]
    #[tokio::test]
    async fn stream_yields_until_completed() {
        use futures::stream::{FusedStream, StreamExt};

        let q = AsyncQueue::new();
        let c = q.consumer();
        let producer = {
            let q = q.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    q.try_add(i).unwrap();
                    tokio::task::yield_now().await;
                }
                q.complete_adding();
            })
        };

        let mut stream = c.stream();
        let mut got = Vec::new();
        while let Some(i) = stream.next().await {
            got.push(i);
        }
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        assert!(stream.is_terminated());
        assert_eq!(stream.next().await, None);
        producer.await.unwrap();
    }
}
