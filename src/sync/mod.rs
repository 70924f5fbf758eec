//! Synchronization primitives available to simulation entities.

pub mod channel;
