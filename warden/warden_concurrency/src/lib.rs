#![deny(warnings)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Warden Concurrency
//!
//! Execution primitives for the Warden authorization engine.
//!
//! The engine evaluates one request at a time, but the agents it drives
//! reply asynchronously. This crate provides the two pieces used to expose
//! that asynchrony synchronously without races:
//!
//! - A serial queue: one named worker thread that runs submitted closures
//!   strictly in order
//! - A one-shot completion signal that lets a caller block until a reply
//!   handler produces a value, or learn that it never will

/// Serial execution queues
pub mod queue;

/// One-shot completion signals
pub mod sync;

// Re-export key types for easier access
pub use queue::serial::{QueueError, SerialQueue};
pub use sync::completion::{completion, CompletionError, Completer, Waiter};
