//! Serial execution queues.
//!
//! A [`SerialQueue`](serial::SerialQueue) owns one worker thread. Work is
//! submitted either asynchronously (`dispatch`) or synchronously (`sync`),
//! and always runs in submission order, one closure at a time.

pub mod serial;
