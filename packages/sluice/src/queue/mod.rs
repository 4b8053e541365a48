// implementation of the completable queue and its consumer cursor.
//
// the basic architecture is as such:
//
// queue handles wrap around Arc<shared state>
//                                 |
//          /----------------------/
//          v
//       shared state
//          |
//          |------ it contains a container, which is an internally thread-safe collection used to
//          |       hold the pending items. the queue imposes no order of its own.
//          |
//          |------ it contains a semaphore with one permit per added item whose availability has
//          |       not yet been consumed. this is what waiters suspend on. a permit only says an
//          |       item _was_ added, so a woken waiter still races other consumers for it.
//          |
//          \------ it contains two cancellation tokens, "adding completed" and "completed", the
//                  former a child of the latter. these are what waiters select against, and what
//                  completion callbacks hang off of.
//
// completion is not a separate event anyone raises. it's re-derived at the tail of every mutating
// operation from "adding completed and container empty", and whichever thread first observes it
// true gets to fire it.
//
// blocking versions of operations are built as a layer on top of the futures, in the polling
// module.
//
// the organization of these modules is as such:
//
//      container<-------------core: The shared state and its completion state machine. Presents
//                             ^     an abstraction which is correct but bare.
//                             |
//      polling<---------------api: This is a wrapper around core that adapts it into an API that
//                             ^    is convenient and defensive. The crate re-exports this API
//                             |    publically.
//                             |
//                             consumer: Cursor over the api, which is also a multiplexer source.
//
// there is also the error module, which contains the relevant error types, which is also
// re-exported publically.

pub(crate) mod error;
pub(crate) mod api;
pub(crate) mod consumer;
pub(crate) mod container;
pub(crate) mod polling;

mod core;
