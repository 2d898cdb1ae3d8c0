//! One-shot completion signals.
//!
//! A completion pairs a [`Completer`], held by whoever will produce a
//! value, with a [`Waiter`], held by whoever blocks for it. Dropping the
//! completer without completing wakes the waiter with
//! [`CompletionError::Abandoned`], so a waiter can never hang on a reply
//! handler that went away.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;

/// Error when waiting for a completion
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionError {
    /// The completer was dropped without a value
    #[error("completion abandoned")]
    Abandoned,

    /// The wait timed out
    #[error("completion timed out")]
    TimedOut,
}

/// The producing half of a completion.
#[derive(Debug)]
pub struct Completer<T> {
    sender: Sender<T>,
}

impl<T> Completer<T> {
    /// Deliver the value.
    ///
    /// # Returns
    ///
    /// `false` if the waiter is gone.
    pub fn complete(self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

/// The consuming half of a completion.
#[derive(Debug)]
pub struct Waiter<T> {
    receiver: Receiver<T>,
}

impl<T> Waiter<T> {
    /// Block until the value arrives or the completer is dropped.
    pub fn wait(self) -> Result<T, CompletionError> {
        self.receiver.recv().map_err(|_| CompletionError::Abandoned)
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, CompletionError> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => CompletionError::TimedOut,
            RecvTimeoutError::Disconnected => CompletionError::Abandoned,
        })
    }
}

/// Create a connected completer/waiter pair.
pub fn completion<T>() -> (Completer<T>, Waiter<T>) {
    let (sender, receiver) = bounded(1);
    (Completer { sender }, Waiter { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_wakes_waiter() {
        let (completer, waiter) = completion();
        let handle = thread::spawn(move || completer.complete(5u32));
        assert_eq!(waiter.wait(), Ok(5));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let (completer, waiter) = completion::<u32>();
        drop(completer);
        assert_eq!(waiter.wait(), Err(CompletionError::Abandoned));
    }

    #[test]
    fn test_wait_timeout() {
        let (_completer, waiter) = completion::<u32>();
        assert_eq!(
            waiter.wait_timeout(Duration::from_millis(10)),
            Err(CompletionError::TimedOut)
        );
    }

    #[test]
    fn test_complete_after_waiter_dropped() {
        let (completer, waiter) = completion();
        drop(waiter);
        assert!(!completer.complete(1u8));
    }
}
