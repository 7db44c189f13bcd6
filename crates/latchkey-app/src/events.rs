//! Out-of-band lock requests.
//!
//! [`LockEvents`] is the broadcast the controller listens on while unlocked.
//! Inactivity timers, the user's lock button, and screen-off notifications
//! all send a [`LockReason`] here instead of calling the controller directly.

use latchkey_core::LockReason;
use tokio::sync::broadcast;

/// Buffered lock requests per listener. One pending request is enough to
/// lock; older ones are dropped when a slow listener lags.
const CAPACITY: usize = 16;

/// Lock event source.
#[derive(Debug, Clone)]
pub struct LockEvents {
    sender: broadcast::Sender<LockReason>,
}

impl LockEvents {
    /// Create a source with no listeners.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    /// Request a lock.
    ///
    /// Returns `false` if nothing is listening, which is the case whenever
    /// the application is already locked.
    pub fn send(&self, reason: LockReason) -> bool {
        self.sender.send(reason).is_ok()
    }

    /// Subscribe to lock requests sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LockReason> {
        self.sender.subscribe()
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LockEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_listener_is_dropped() {
        let events = LockEvents::new();
        assert!(!events.send(LockReason::Timeout));
        assert_eq!(events.listener_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_requests() {
        let events = LockEvents::new();
        let mut rx = events.subscribe();

        assert!(events.send(LockReason::ScreenOff));
        assert_eq!(rx.recv().await.ok(), Some(LockReason::ScreenOff));

        drop(rx);
        assert_eq!(events.listener_count(), 0);
    }
}
