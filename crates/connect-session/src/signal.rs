//! Terminal refresh failure flag
//!
//! A level, not an event stream: the value is `true` while the session is in
//! terminal failure and flips back to `false` on the next successful refresh
//! or credential install. Subscribers see the latest value, never a queue.

use std::sync::Arc;

use tokio::sync::watch;

/// Observable "refresh has permanently failed" flag.
///
/// Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct FailureSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl FailureSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_failed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver for UI/session layers. Starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the flag is raised.
    pub async fn failed(&self) {
        let mut rx = self.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|failed| *failed).await;
    }

    /// Set the level. Subscribers are only woken when the value changes.
    pub(crate) fn set(&self, failed: bool) {
        self.tx.send_if_modified(|current| {
            if *current == failed {
                false
            } else {
                *current = failed;
                true
            }
        });
    }
}

impl Default for FailureSignal {
    fn default() -> Self {
        Self::new()
    }
}
