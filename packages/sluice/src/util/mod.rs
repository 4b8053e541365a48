//! Utilities

pub mod atomic_slot;
pub(crate) mod deferred;
