//! Cooperative cancellation.
//!
//! A shutdown pair is a one-way latch built on channel disconnection: the
//! trigger side drops its sender, and every [`ShutdownWatch`] clone observes
//! the disconnect at once, forever. The same primitive serves as the test
//! scope shared by all executors and as the per-executor stop signal used
//! for downscaling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Create a connected trigger/watch pair.
pub fn shutdown_pair() -> (ShutdownTrigger, ShutdownWatch) {
    let (sender, receiver) = flume::bounded::<()>(1);
    (
        ShutdownTrigger {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        ShutdownWatch { receiver },
    )
}

/// The owning side of a shutdown pair. Cloning shares the same latch.
///
/// Dropping the last clone without calling [`trigger`](Self::trigger) also
/// fires the latch, so holding a trigger is what keeps a scope alive.
#[derive(Clone)]
pub struct ShutdownTrigger {
    sender: Arc<Mutex<Option<flume::Sender<()>>>>,
}

impl ShutdownTrigger {
    /// Fire the latch. Idempotent.
    pub fn trigger(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Fire the latch after `delay` unless it already fired.
    pub fn trigger_after(&self, delay: Duration) {
        let trigger = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.trigger();
        });
    }
}

/// The observing side of a shutdown pair.
#[derive(Clone)]
pub struct ShutdownWatch {
    receiver: flume::Receiver<()>,
}

impl ShutdownWatch {
    /// Non-blocking check, suitable for iteration boundaries.
    pub fn is_shutdown(&self) -> bool {
        self.receiver.is_disconnected()
    }

    /// Suspend until the latch fires.
    pub async fn wait(&self) {
        // No messages are ever sent; recv_async returns when the trigger
        // side disconnects.
        let _ = self.receiver.recv_async().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_all_watchers() {
        let (trigger, watch) = shutdown_pair();
        let second = watch.clone();
        assert!(!watch.is_shutdown());
        trigger.trigger();
        assert!(watch.is_shutdown());
        assert!(second.is_shutdown());
        // Already-fired latches resolve immediately.
        watch.wait().await;
        second.wait().await;
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let (trigger, watch) = shutdown_pair();
        trigger.trigger();
        trigger.trigger();
        assert!(watch.is_shutdown());
    }

    #[tokio::test]
    async fn dropping_all_triggers_fires() {
        let (trigger, watch) = shutdown_pair();
        let clone = trigger.clone();
        drop(trigger);
        assert!(!watch.is_shutdown());
        drop(clone);
        assert!(watch.is_shutdown());
    }

    #[tokio::test]
    async fn deadline_fires() {
        let (trigger, watch) = shutdown_pair();
        trigger.trigger_after(Duration::from_millis(20));
        assert!(!watch.is_shutdown());
        watch.wait().await;
        assert!(watch.is_shutdown());
    }
}
