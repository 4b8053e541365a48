// fair multiplexing over a fixed set of sources.
//
// each step first scans the sources in rotation under the lock, giving each one non-blocking
// attempt, starting just past whichever source was served last. only if that finds nothing does it
// release the lock and race the sources' waits, after which it scans again. sources that report
// completion are retired in place, so the rotation order never shifts.

use crate::{
    queue::{
        api::AsyncQueue,
        container::Container,
        error::*,
        polling::block_on,
    },
    source::{Source, WaitFuture, TryWaitFuture},
    util::deferred::DeferScope,
};
use crossbeam_utils::atomic::AtomicCell;
use smallvec::SmallVec;
use std::{
    fmt::{self, Formatter, Debug},
    future::{Future, poll_fn},
    iter::FusedIterator,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard},
    task::Poll,
    thread::{self, ThreadId},
};
use tokio_util::sync::CancellationToken;


/// Fair multiplexer over an ordered, fixed set of [`Source`]s
///
/// Serves sources in round-robin order: after serving one, the next step starts scanning at the
/// source after it, so under steady supply every non-empty source is served once per lap.
/// Iteration ends once every source has completed, or once the bound cancellation token fires.
///
/// Also a [`Source`] itself, so multiplexers nest.
pub struct Multiplexer<T> {
    state: Mutex<MuxState<T>>,
    // thread currently holding the state lock, to catch re-entrance
    holder: AtomicCell<Option<ThreadId>>,
    cancel: CancellationToken,
}

/// State of a [`Multiplexer`], see [`Multiplexer::with_lock`]
pub struct MuxState<T> {
    slots: Vec<Slot<T>>,
    // last served slot
    index: usize,
}

enum Slot<T> {
    Active(Arc<dyn Source<T>>),
    Retired,
}

impl<T: Send + 'static> Multiplexer<T> {
    /// Construct over the given sources, in rotation order
    pub fn from_sources<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Source<T>>>,
    {
        let slots = sources.into_iter().map(Slot::Active).collect::<Vec<_>>();
        // so that the first scan starts at slot 0
        let index = slots.len().saturating_sub(1);
        Multiplexer {
            state: Mutex::new(MuxState { slots, index }),
            holder: AtomicCell::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Construct over a fresh consumer of each of the given queues, in rotation order
    pub fn from_queues<C, I>(queues: I) -> Self
    where
        C: Container<T> + 'static,
        I: IntoIterator<Item = AsyncQueue<T, C>>,
    {
        Self::from_sources(queues.into_iter()
            .map(|queue| Arc::new(queue.consumer()) as Arc<dyn Source<T>>))
    }

    /// Treat the given slot as the last served, so the first scan starts just after it
    ///
    /// The index is taken modulo the number of sources.
    pub fn with_start_index(self, index: usize) -> Self {
        {
            let mut state = self.lock();
            let n = state.slots.len();
            state.index = if n == 0 { 0 } else { index % n };
        }
        self
    }

    /// Bind a cancellation token which ends iteration once it fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wait for and return the next item from any source
    ///
    /// Returns `None` once every source has completed, or once the bound cancellation token has
    /// fired.
    pub async fn next(&self) -> Option<T> {
        loop {
            if self.cancel.is_cancelled() {
                trace!("multiplexer cancelled");
                return None;
            }
            let waiting = {
                let mut state = self.lock();
                if let Some(item) = state.select() {
                    return Some(item);
                }
                state.waitable()
            };
            if waiting.is_empty() {
                debug!("multiplexer exhausted");
                return None;
            }
            race(&waiting, &self.cancel).await;
        }
    }

    /// Block until the next item from any source
    ///
    /// See [`next`](Self::next).
    pub fn next_blocking(&self) -> Option<T> {
        block_on(self.next())
    }

    /// Blocking iterator over the remaining items
    pub fn iter(&self) -> MuxIter<'_, T> {
        MuxIter { mux: self }
    }

    /// Stream of the remaining items
    #[cfg(feature = "futures")]
    pub fn stream(&self) -> MuxStream<'_, T> {
        MuxStream {
            mux: self,
            next: None,
            terminated: false,
        }
    }

    /// Run a closure with the state locked, for inspecting several aspects of it atomically
    ///
    /// Panics if called re-entrantly on the same thread, including by calling back into this
    /// multiplexer from within the closure. Completion callbacks of queues drained while the lock
    /// is held run after it is released, so they may use the multiplexer.
    pub fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&MuxState<T>) -> R,
    {
        let state = self.lock();
        f(&state)
    }

    /// Retire every source
    ///
    /// The sources themselves are left untouched. Afterwards the multiplexer is exhausted.
    pub fn dispose(&self) {
        let mut state = self.lock();
        for slot in &mut state.slots {
            *slot = Slot::Retired;
        }
        debug!("multiplexer disposed");
    }

    // wait until some source may have an item available. returns false if there are no sources
    // left to wait on, or if cancel fired.
    async fn wait_any(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let waiting = {
                let mut state = self.lock();
                if state.has_any() {
                    return true;
                }
                state.waitable()
            };
            if waiting.is_empty() {
                return false;
            }
            if race(&waiting, cancel).await {
                return true;
            }
        }
    }

    fn lock(&self) -> Locked<'_, T> {
        let current = thread::current().id();
        if self.holder.load() == Some(current) {
            panic!("multiplexer lock re-entered on the same thread");
        }
        let defer = DeferScope::enter();
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.holder.store(Some(current));
        Locked { guard, _defer: defer, holder: &self.holder }
    }
}

// race the sources' waits. returns true as soon as any reports ready, or false once all have
// dropped out of the race.
async fn race<T>(sources: &[Arc<dyn Source<T>>], cancel: &CancellationToken) -> bool {
    let mut waits = sources.iter()
        .map(|source| source.try_wait_for_available(cancel))
        .collect::<SmallVec<[TryWaitFuture<'_>; 4]>>();
    poll_fn(|cx| {
        let mut i = 0;
        while i < waits.len() {
            match waits[i].as_mut().poll(cx) {
                Poll::Ready(true) => return Poll::Ready(true),
                Poll::Ready(false) => drop(waits.swap_remove(i)),
                Poll::Pending => i += 1,
            }
        }
        if waits.is_empty() {
            Poll::Ready(false)
        } else {
            Poll::Pending
        }
    }).await
}

impl<T> MuxState<T> {
    /// Index of the last served source, which the next scan starts just after
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether any active source currently reports an item available
    pub fn has_any(&self) -> bool {
        self.active_sources().any(|source| !source.is_empty())
    }

    /// Whether no active source currently reports an item available
    pub fn is_empty(&self) -> bool {
        !self.has_any()
    }

    /// Whether every source is retired or completed
    pub fn is_completed(&self) -> bool {
        self.active_sources().all(|source| source.is_completed())
    }

    /// Number of sources, including retired ones
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Number of sources not yet retired
    pub fn active(&self) -> usize {
        self.active_sources().count()
    }

    fn active_sources(&self) -> impl Iterator<Item = &Arc<dyn Source<T>>> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Active(source) => Some(source),
            Slot::Retired => None,
        })
    }

    // scan in rotation for an item, retiring completed sources along the way. keeps rescanning
    // while some source claims to be non-empty.
    fn select(&mut self) -> Option<T> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        loop {
            for step in 1..=n {
                let i = (self.index + step) % n;
                let Slot::Active(source) = &self.slots[i] else { continue };
                if let Some(item) = source.try_move_next() {
                    self.index = i;
                    return Some(item);
                }
                let completed = source.is_completed();
                if completed {
                    trace!(slot = i, "retiring completed source");
                    self.slots[i] = Slot::Retired;
                }
            }
            if !self.has_any() {
                return None;
            }
        }
    }

    // retire completed sources, and clone out the rest to be waited on.
    fn waitable(&mut self) -> Vec<Arc<dyn Source<T>>> {
        let mut waiting = Vec::new();
        for slot in &mut self.slots {
            let completed = match slot {
                Slot::Active(source) if !source.is_completed() => {
                    waiting.push(Arc::clone(source));
                    false
                }
                Slot::Active(_) => true,
                Slot::Retired => false,
            };
            if completed {
                *slot = Slot::Retired;
            }
        }
        waiting
    }
}

impl<T> Debug for MuxState<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MuxState")
            .field("index", &self.index)
            .field("len", &self.len())
            .field("active", &self.active())
            .finish()
    }
}

// state lock guard which tracks the holding thread.
//
// completion callbacks fired by sources while locked are deferred until after unlock. fields drop
// in order, so the mutex is released before the scope runs them.
struct Locked<'a, T> {
    guard: MutexGuard<'a, MuxState<T>>,
    _defer: DeferScope,
    holder: &'a AtomicCell<Option<ThreadId>>,
}

impl<'a, T> Deref for Locked<'a, T> {
    type Target = MuxState<T>;

    fn deref(&self) -> &MuxState<T> {
        &self.guard
    }
}

impl<'a, T> DerefMut for Locked<'a, T> {
    fn deref_mut(&mut self) -> &mut MuxState<T> {
        &mut self.guard
    }
}

impl<'a, T> Drop for Locked<'a, T> {
    fn drop(&mut self) {
        self.holder.store(None);
    }
}

impl<T: Send + 'static> Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.with_lock(|state| f.debug_tuple("Multiplexer").field(state).finish())
    }
}

impl<T: Send + 'static> Source<T> for Multiplexer<T> {
    fn is_empty(&self) -> bool {
        self.with_lock(MuxState::is_empty)
    }

    fn is_completed(&self) -> bool {
        self.with_lock(MuxState::is_completed)
    }

    fn try_move_next(&self) -> Option<T> {
        self.lock().select()
    }

    fn wait_for_available<'a>(&'a self, cancel: &'a CancellationToken) -> WaitFuture<'a> {
        Box::pin(async move {
            if self.is_completed() {
                return Err(AlreadyCompletedError.into());
            }
            if self.wait_any(cancel).await {
                Ok(())
            } else if cancel.is_cancelled() {
                Err(CancelledError.into())
            } else {
                Err(NoMoreItemsError.into())
            }
        })
    }

    fn try_wait_for_available<'a>(&'a self, cancel: &'a CancellationToken) -> TryWaitFuture<'a> {
        Box::pin(self.wait_any(cancel))
    }
}


// ==== iteration ====


/// Blocking iterator over a [`Multiplexer`], see [`Multiplexer::iter`]
pub struct MuxIter<'a, T> {
    mux: &'a Multiplexer<T>,
}

impl<'a, T: Send + 'static> Iterator for MuxIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.mux.next_blocking()
    }
}

impl<'a, T: Send + 'static> FusedIterator for MuxIter<'a, T> {}

#[cfg(feature = "futures")]
pub use self::stream::MuxStream;

#[cfg(feature = "futures")]
mod stream {
    use super::*;
    use std::{
        pin::Pin,
        task::{Context, ready},
    };

    type NextFut<'a, T> = Pin<Box<dyn Future<Output = Option<T>> + Send + 'a>>;

    fn next_fut<T: Send + 'static>(mux: &Multiplexer<T>) -> NextFut<'_, T> {
        Box::pin(mux.next())
    }

    /// Stream over a [`Multiplexer`], see [`Multiplexer::stream`]
    pub struct MuxStream<'a, T> {
        pub(super) mux: &'a Multiplexer<T>,
        pub(super) next: Option<NextFut<'a, T>>,
        pub(super) terminated: bool,
    }

    impl<'a, T: Send + 'static> futures::Stream for MuxStream<'a, T> {
        type Item = T;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
            let this = self.get_mut();
            if this.terminated {
                return Poll::Ready(None);
            }
            let mux = this.mux;
            let next = this.next.get_or_insert_with(|| next_fut(mux));
            let item = ready!(next.as_mut().poll(cx));
            this.next = None;
            this.terminated = item.is_none();
            Poll::Ready(item)
        }
    }

    impl<'a, T: Send + 'static> futures::stream::FusedStream for MuxStream<'a, T> {
        fn is_terminated(&self) -> bool {
            self.terminated
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        queue::consumer::Consumer,
        source::Empty,
    };
    use std::{
        collections::HashSet,
        sync::Mutex as StdMutex,
        time::Duration,
    };

    fn closed<T: Send>(items: Vec<T>) -> AsyncQueue<T> {
        let queue = AsyncQueue::from_items(items);
        queue.complete_adding();
        queue
    }

    #[test]
    fn alternates_between_sources() {
        let a = closed(vec!["a1", "a2", "a3"]);
        let b = closed(vec!["b1", "b2", "b3"]);
        let mux = Multiplexer::from_queues([a, b]);
        assert_eq!(
            mux.iter().collect::<Vec<_>>(),
            vec!["a1", "b1", "a2", "b2", "a3", "b3"],
        );
        assert!(mux.with_lock(MuxState::is_completed));
    }

    #[test]
    fn uneven_sources_drain_fairly() {
        let a = closed(vec![1]);
        let b = closed(vec![10, 20, 30]);
        let c = closed(vec![100, 200]);
        let mux = Multiplexer::from_queues([a, b, c]);
        assert_eq!(
            mux.iter().collect::<Vec<_>>(),
            vec![1, 10, 100, 20, 200, 30],
        );
    }

    #[test]
    fn exhausts_with_one_empty_source() {
        let a = closed(Vec::<u32>::new());
        let b = closed(vec![1, 2]);
        let mux = Multiplexer::from_queues([a.clone(), b.clone()]);
        assert_eq!(mux.next_blocking(), Some(1));
        assert_eq!(mux.next_blocking(), Some(2));
        assert_eq!(mux.next_blocking(), None);
        assert_eq!(mux.next_blocking(), None);
        assert!(a.is_completed());
        assert!(b.is_completed());
        mux.with_lock(|state| {
            assert_eq!(state.len(), 2);
            assert_eq!(state.active(), 0);
        });
    }

    #[test]
    fn no_sources_is_exhausted() {
        let mux = Multiplexer::<u8>::from_sources([]);
        assert_eq!(mux.next_blocking(), None);
        assert!(mux.is_completed());
        assert!(Source::is_empty(&mux));
        assert!(!block_on(mux.try_wait_for_available(&CancellationToken::new())));
    }

    #[test]
    fn start_index_sets_first_served() {
        let queues = (0..3).map(|i| closed(vec![i])).collect::<Vec<_>>();
        let mux = Multiplexer::from_queues(queues).with_start_index(4);
        mux.with_lock(|state| assert_eq!(state.index(), 1));
        assert_eq!(mux.iter().collect::<Vec<_>>(), vec![2, 0, 1]);
    }

    #[test]
    fn index_stays_on_served_source() {
        let a = AsyncQueue::from_items([1, 2]);
        let b = AsyncQueue::<i32>::new();
        let mux = Multiplexer::from_queues([a.clone(), b.clone()]);
        assert_eq!(mux.next_blocking(), Some(1));
        mux.with_lock(|state| assert_eq!(state.index(), 0));
        // b is empty, so the scan wraps back around to a
        assert_eq!(mux.next_blocking(), Some(2));
        mux.with_lock(|state| assert_eq!(state.index(), 0));
        b.try_add(3).unwrap();
        assert_eq!(mux.next_blocking(), Some(3));
        mux.with_lock(|state| assert_eq!(state.index(), 1));
    }

    #[test]
    fn sentinel_and_completed_sources_are_retired() {
        let queue = AsyncQueue::from_items([5]);
        let mux = Multiplexer::from_sources([
            Arc::new(Empty::new()) as Arc<dyn Source<i32>>,
            Arc::new(queue.consumer()),
        ]);
        assert_eq!(mux.next_blocking(), Some(5));
        mux.with_lock(|state| {
            assert_eq!(state.active(), 1);
            assert!(state.is_empty());
            assert!(!state.is_completed());
        });
        queue.complete_adding();
        assert_eq!(mux.next_blocking(), None);
    }

    #[test]
    fn nested_multiplexers() {
        let inner = Multiplexer::from_queues([closed(vec![1, 3]), closed(vec![2, 4])]);
        let outer = Multiplexer::from_sources([
            Arc::new(inner) as Arc<dyn Source<i32>>,
            Arc::new(closed(vec![10, 20, 30]).consumer()),
        ]);
        assert_eq!(
            outer.iter().collect::<Vec<_>>(),
            vec![1, 10, 2, 20, 3, 30, 4],
        );
        assert!(outer.is_completed());
    }

    #[test]
    fn with_lock_sees_consistent_state() {
        let a = AsyncQueue::<u8>::new();
        let b = AsyncQueue::from_items([1u8]);
        let mux = Multiplexer::from_queues([a.clone(), b.clone()]);

        let (empty, completed) = mux.with_lock(|s| (s.is_empty(), s.is_completed()));
        assert!(!empty);
        assert!(!completed);

        assert_eq!(mux.next_blocking(), Some(1));
        a.complete_adding();
        b.complete_adding();
        let (empty, completed) = mux.with_lock(|s| (s.is_empty(), s.is_completed()));
        assert!(empty);
        assert!(completed);
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn with_lock_reentrance_panics() {
        let mux = Multiplexer::from_queues([AsyncQueue::<u8>::new()]);
        mux.with_lock(|_| mux.with_lock(|_| ()));
    }

    #[test]
    fn completion_callbacks_run_after_unlock() {
        let queue = closed(vec![1]);
        let mux = Arc::new(Multiplexer::from_queues([queue.clone()]));
        let seen = Arc::new(StdMutex::new(None));
        {
            let mux = Arc::clone(&mux);
            let seen = Arc::clone(&seen);
            queue.on_completed(move || {
                let active = mux.with_lock(|state| state.active());
                *seen.lock().unwrap() = Some(active);
            });
        }
        assert_eq!(mux.next_blocking(), Some(1));
        // fired by the take of the last item, during selection
        assert_eq!(*seen.lock().unwrap(), Some(1));
        assert_eq!(mux.next_blocking(), None);
    }

    #[test]
    fn dispose_retires_without_touching_sources() {
        let a = AsyncQueue::from_items([1, 2]);
        let mux = Multiplexer::from_queues([a.clone()]);
        mux.dispose();
        assert_eq!(mux.next_blocking(), None);
        assert!(mux.is_completed());
        assert!(!a.is_disposed());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn bound_cancellation_ends_iteration() {
        let cancel = CancellationToken::new();
        let queue = AsyncQueue::<u32>::new();
        let mux = Multiplexer::from_queues([queue.clone()])
            .with_cancellation(cancel.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        assert_eq!(mux.next_blocking(), None);
        canceller.join().unwrap();
        assert!(!queue.is_adding_completed());
    }

    #[test]
    fn many_threads_drain_exactly_once() {
        let queues = (0..4).map(|_| AsyncQueue::new()).collect::<Vec<_>>();
        let mux = Arc::new(Multiplexer::from_queues(queues.clone()));
        let seen = Arc::new(StdMutex::new(HashSet::new()));

        let consumers = (0..3)
            .map(|_| {
                let mux = Arc::clone(&mux);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for item in mux.iter() {
                        assert!(seen.lock().unwrap().insert(item));
                    }
                })
            })
            .collect::<Vec<_>>();
        let producers = queues.iter()
            .enumerate()
            .map(|(q, queue)| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        queue.try_add(q * 1000 + i).unwrap();
                    }
                    queue.complete_adding();
                })
            })
            .collect::<Vec<_>>();

        for join in producers.into_iter().chain(consumers) {
            join.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn wakes_on_add_to_any_source() {
        let a = AsyncQueue::<&str>::new();
        let b = AsyncQueue::<&str>::new();
        let mux = Multiplexer::from_queues([a.clone(), b.clone()]);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            b.try_add("late").unwrap();
            b.complete_adding();
        });
        assert_eq!(mux.next().await, Some("late"));
        producer.await.unwrap();
        a.complete_adding();
        assert_eq!(mux.next().await, None);
    }

    #[tokio::test]
    async fn source_wait_reports_exhaustion() {
        let a = AsyncQueue::<u8>::new();
        let mux = Multiplexer::from_sources([
            Arc::new(Consumer::new(a.clone())) as Arc<dyn Source<u8>>,
        ]);
        let never = CancellationToken::new();
        a.try_add(1).unwrap();
        assert_eq!(mux.wait_for_available(&never).await, Ok(()));
        assert_eq!(Source::try_move_next(&mux), Some(1));

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(!mux.try_wait_for_available(&cancelled).await);
        assert_eq!(
            mux.wait_for_available(&cancelled).await,
            Err(CancelledError.into()),
        );

        a.complete_adding();
        assert_eq!(
            mux.wait_for_available(&never).await,
            Err(AlreadyCompletedError.into()),
        );
    }

    #[cfg(feature = "futures")]
    #[tokio::test]
    async fn stream_alternates_and_fuses() {
        use futures::stream::{FusedStream, StreamExt};

        let mux = Multiplexer::from_queues([closed(vec![1, 3]), closed(vec![2])]);
        let mut stream = mux.stream();
        let mut got = Vec::new();
        while let Some(i) = stream.next().await {
            got.push(i);
        }
        assert_eq!(got, vec![1, 2, 3]);
        assert!(stream.is_terminated());
    }
}
