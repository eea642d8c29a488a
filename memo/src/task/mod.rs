//! Background tasks for the memory store.

pub(crate) mod sweeper;
