//! Cancellation primitive for background waits.
//!
//! Built on a zero-capacity channel: cancelling drops the only sender, which
//! wakes every outstanding `recv_timeout` immediately. Tokens are cheap
//! clones of the receiving side, so a sleep in one thread and a cancellation
//! check in another observe the same signal.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

/// Owner side of a cancellation signal.
pub struct Cancellation {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Hand out a token observing this signal.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.rx.clone(),
        }
    }

    /// Raise the signal. Idempotent; wakes all pending waits.
    pub fn cancel(&self) {
        self.tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Wait for `timeout`, returning true if cancelled before it elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// Channel for use in `select!` loops; becomes ready on cancellation.
    pub fn channel(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn token_starts_uncancelled() {
        let cancellation = Cancellation::new();
        let token = cancellation.token();
        assert!(!token.is_cancelled());
        assert!(!cancellation.is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_all_tokens() {
        let cancellation = Cancellation::new();
        let a = cancellation.token();
        let b = a.clone();
        cancellation.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(cancellation.is_cancelled());
    }

    #[test]
    fn wait_times_out_when_not_cancelled() {
        let cancellation = Cancellation::new();
        let token = cancellation.token();
        assert!(!token.wait(Duration::from_millis(10)));
    }

    #[test]
    fn cancel_wakes_pending_wait() {
        let cancellation = Cancellation::new();
        let token = cancellation.token();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let cancelled = token.wait(Duration::from_secs(10));
            (cancelled, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        cancellation.cancel();

        let (cancelled, elapsed) = handle.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(1), "wait should wake early");
    }

    #[test]
    fn cancel_is_idempotent() {
        let cancellation = Cancellation::new();
        cancellation.cancel();
        cancellation.cancel();
        assert!(cancellation.token().is_cancelled());
    }
}
