//! Completable multi-producer multi-consumer queues, with consumer cursors and fair multiplexing.

#[macro_use]
extern crate tracing;

mod queue;
mod mux;
pub mod source;
pub mod util;

pub use crate::{
    queue::{
        api::*,
        consumer::*,
        container::*,
    },
    mux::*,
    source::{Source, Empty},
};

/// Error types
pub mod error {
    pub use crate::queue::error::*;
}

/// Re-exported cancellation token that waits and iteration select against
pub use tokio_util::sync::CancellationToken;
