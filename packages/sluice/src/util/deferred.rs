// deferral of completion callbacks out of critical sections.
//
// while a scope is entered on a thread, callbacks fired on that thread are queued instead of run,
// and the outermost scope runs them when it exits. a multiplexer holds a scope alongside its state
// lock, so a source completing during selection can't call back into the locked multiplexer.

use std::cell::RefCell;


// callback run once upon completion.
pub(crate) type Callback = Box<dyn FnOnce() + Send>;

thread_local! {
    // queue of the outermost active scope on this thread, if any.
    static DEFERRED: RefCell<Option<Vec<Callback>>> = const { RefCell::new(None) };
}

// scope within which callbacks are deferred. runs them on drop if it's the outermost.
pub(crate) struct DeferScope {
    outermost: bool,
}

impl DeferScope {
    pub(crate) fn enter() -> Self {
        let outermost = DEFERRED.with(|deferred| {
            let mut deferred = deferred.borrow_mut();
            if deferred.is_none() {
                *deferred = Some(Vec::new());
                true
            } else {
                false
            }
        });
        DeferScope { outermost }
    }
}

impl Drop for DeferScope {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        // taken before running, so callbacks may enter scopes of their own
        let callbacks = DEFERRED.with(|deferred| deferred.borrow_mut().take()).unwrap_or_default();
        if !callbacks.is_empty() {
            trace!(callbacks = callbacks.len(), "running deferred callbacks");
        }
        for callback in callbacks {
            callback();
        }
    }
}

// run the callbacks now, or queue them if a scope is active on this thread.
pub(crate) fn run_or_defer(callbacks: Vec<Callback>) {
    let callbacks = DEFERRED.with(|deferred| match &mut *deferred.borrow_mut() {
        Some(queued) => {
            queued.extend(callbacks);
            Vec::new()
        }
        None => callbacks,
    });
    for callback in callbacks {
        callback();
    }
}
