//! Synchronization primitives.

pub mod completion;
