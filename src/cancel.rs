//! Out-of-band cancellation for one pipeline run.
//!
//! The token carries a channel that never transmits. Cancelling drops the
//! only sender, which makes every pending `recv` on the signal return at
//! once; blocked `put`/`take` calls select over that signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};

struct Trigger {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
}

/// Shared cancellation flag that wakes blocked channel operations.
#[derive(Clone)]
pub struct CancelToken {
    trigger: Arc<Trigger>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, signal) = channel::bounded(0);
        Self {
            trigger: Arc::new(Trigger {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
            }),
            signal,
        }
    }

    /// Cancel every holder of this token. Idempotent.
    pub fn cancel(&self) {
        self.trigger.cancelled.store(true, Ordering::SeqCst);
        let sender = self
            .trigger
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            log::debug!("cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.trigger.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once cancelled.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.signal().try_recv().is_err());
        assert!(
            token
                .signal()
                .recv_timeout(Duration::from_millis(10))
                .unwrap_err()
                .is_timeout()
        );
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.signal().recv().is_err());
    }

    #[test]
    fn test_cancel_twice_is_harmless() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_blocked_receiver() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.signal().recv().is_err());
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }
}
