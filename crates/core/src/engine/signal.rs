//! Per-item control channels for running phases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::progress::Signal;

/// One watch channel per item holding a slot.
///
/// The receiver lives inside the phase's [`crate::progress::ProgressSink`];
/// once the phase has written its final state and dropped the sink, the
/// sender observes the channel as closed.
#[derive(Debug, Default)]
pub(crate) struct SignalRegistry {
    running: Mutex<HashMap<String, Arc<watch::Sender<Signal>>>>,
}

/// Identifies the channel opened by one [`SignalRegistry::register`] call.
#[derive(Debug)]
pub(crate) struct Registered(Arc<watch::Sender<Signal>>);

/// Handle returned when a signal was delivered to a running phase.
#[derive(Debug)]
pub(crate) struct Delivered {
    sender: Arc<watch::Sender<Signal>>,
}

impl Delivered {
    /// Wait until the phase has released its sink, or `timeout` passes.
    ///
    /// Returns `false` on timeout.
    pub async fn settled(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.sender.closed()).await.is_ok()
    }
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<watch::Sender<Signal>>>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the channel for a phase about to start, replacing any older one.
    pub fn register(&self, item_id: &str) -> (watch::Receiver<Signal>, Registered) {
        let (tx, rx) = watch::channel(Signal::Run);
        let sender = Arc::new(tx);
        self.lock().insert(item_id.to_string(), Arc::clone(&sender));
        (rx, Registered(sender))
    }

    /// Deliver `signal` to the running phase of `item_id`, if any.
    ///
    /// A cancel is never downgraded to a pause.
    pub fn send(&self, item_id: &str, signal: Signal) -> Option<Delivered> {
        let sender = self.lock().get(item_id).cloned()?;
        sender.send_if_modified(|current| {
            if *current == Signal::Cancel || *current == signal {
                false
            } else {
                *current = signal;
                true
            }
        });
        Some(Delivered { sender })
    }

    /// Drop the channel of a phase that has ended.
    ///
    /// A channel registered since by the item's next phase is left in place.
    pub fn finish(&self, item_id: &str, registered: &Registered) {
        let mut running = self.lock();
        if running
            .get(item_id)
            .is_some_and(|current| Arc::ptr_eq(current, &registered.0))
        {
            running.remove(item_id);
        }
    }

    pub fn is_running(&self, item_id: &str) -> bool {
        self.lock().contains_key(item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_registration() {
        let registry = SignalRegistry::new();
        assert!(registry.send("a", Signal::Pause).is_none());

        let (rx, registered) = registry.register("a");
        assert!(registry.is_running("a"));
        assert!(registry.send("a", Signal::Pause).is_some());
        assert_eq!(*rx.borrow(), Signal::Pause);

        registry.finish("a", &registered);
        assert!(!registry.is_running("a"));
        assert!(registry.send("a", Signal::Cancel).is_none());
    }

    #[test]
    fn test_cancel_is_sticky() {
        let registry = SignalRegistry::new();
        let (rx, _registered) = registry.register("a");
        registry.send("a", Signal::Cancel);
        registry.send("a", Signal::Pause);
        assert_eq!(*rx.borrow(), Signal::Cancel);
    }

    #[test]
    fn test_finish_keeps_next_phase_channel() {
        let registry = SignalRegistry::new();
        let (_acquiring, acquisition) = registry.register("a");
        // The transfer is admitted before the acquisition task cleans up.
        let (transferring, _transfer) = registry.register("a");

        registry.finish("a", &acquisition);
        assert!(registry.is_running("a"));
        assert!(registry.send("a", Signal::Cancel).is_some());
        assert_eq!(*transferring.borrow(), Signal::Cancel);
    }

    #[tokio::test]
    async fn test_settled_when_receiver_dropped() {
        let registry = SignalRegistry::new();
        let (rx, _registered) = registry.register("a");
        let delivered = registry.send("a", Signal::Pause).unwrap();

        assert!(!delivered.settled(Duration::from_millis(20)).await);
        drop(rx);
        assert!(delivered.settled(Duration::from_millis(20)).await);
    }
}
