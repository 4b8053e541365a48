// internal future polling system for the blocking api.
//
// design based on pollster crate, but with the waker's signal reference-counted so any future can
// be driven without unsafe code. every blocking operation in the crate is its async counterpart
// driven through here, so both share one semaphore and one set of cancellation tokens.

use std::{
    future::Future,
    sync::{Arc, Condvar, Mutex},
    task::{Context, Poll, Wake, Waker},
    time::Instant,
    pin::pin,
};


// timeout for blocking on a future.
#[derive(Debug, Copy, Clone)]
pub(crate) enum Timeout {
    // never time out.
    Never,
    // time out at the given deadline.
    At(Instant),
    // time out if the future cannot be resolved without blocking.
    #[cfg(test)]
    NonBlocking,
}

// poll the future until it resolves or the timeout is reached, in which case return none. the
// future is dropped before returning either way.
pub(crate) fn poll<F: Future>(fut: F, timeout: Timeout) -> Option<F::Output> {
    let mut fut = pin!(fut);
    let signal = Arc::new(Signal {
        state: Mutex::new(State::Empty),
        cond: Condvar::new(),
    });
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);

    loop {
        // return if ready
        if let Poll::Ready(output) = fut.as_mut().poll(&mut cx) {
            return Some(output);
        }

        // otherwise, block until notification or timeout
        let mut lock = signal.lock();

        // if a notification is already present, skip to the next loop iteration so as to release
        // the lock and try polling again without blocking.
        if let State::Notified = *lock {
            *lock = State::Empty;
            continue;
        }

        // otherwise, actually block until notification or timeout
        debug_assert!(matches!(*lock, State::Empty));
        *lock = State::Waiting;
        match timeout {
            // block on mutex + condvar indefinitely
            Timeout::Never =>
                while let State::Waiting = *lock {
                    lock = signal.cond.wait(lock).unwrap_or_else(|e| e.into_inner());
                },

            // block on mutex + condvar until deadline, at which point return none
            Timeout::At(deadline) =>
                while let State::Waiting = *lock {
                    let Some(duration) =
                        deadline.checked_duration_since(Instant::now())
                        else { return None };
                    let (lock2, wait_result) = signal.cond.wait_timeout(lock, duration)
                        .unwrap_or_else(|e| e.into_inner());
                    lock = lock2;
                    if wait_result.timed_out() && matches!(*lock, State::Waiting) {
                        return None;
                    }
                },

            // dont block on mutex + condvar, return none instead
            #[cfg(test)]
            Timeout::NonBlocking => return None,
        }
        *lock = State::Empty;
    }
}

// block on the future with no timeout.
pub(crate) fn block_on<F: Future>(fut: F) -> F::Output {
    match poll(fut, Timeout::Never) {
        Some(output) => output,
        None => unreachable!("poll timed out with Timeout::Never"),
    }
}

// synchronization signal state
enum State {
    Empty,
    Waiting,
    Notified,
}

// synchronization signal
struct Signal {
    state: Mutex<State>,
    cond: Condvar,
}

impl Signal {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // notify signal
        let mut lock = self.lock();
        match *lock {
            State::Notified => (),
            State::Empty => {
                *lock = State::Notified;
            }
            State::Waiting => {
                *lock = State::Empty;
                self.cond.notify_one();
            }
        }
    }
}
