//! Object backend abstraction
//!
//! A backend is a linearizable map from string keys to opaque bytes, where
//! every key carries a version token. Version `0` means the key is absent;
//! each successful write bumps the version by one.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::error::StateResult;

/// A value together with the version token it was read at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Versioned key/value store with compare-and-swap and change notification
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Read the current bytes and version of `key`
    async fn get(&self, key: &str) -> StateResult<Option<Versioned<Vec<u8>>>>;

    /// Write `data` only if `key` is still at `expected_version`.
    ///
    /// Returns the new version, or `StateError::Conflict` if another writer
    /// got there first.
    async fn compare_and_put(
        &self,
        key: &str,
        expected_version: u64,
        data: Vec<u8>,
    ) -> StateResult<u64>;

    /// Keys starting with `prefix`, in key order
    async fn list(&self, prefix: &str) -> StateResult<Vec<String>>;

    /// Subscribe to version changes of `key`.
    ///
    /// The receiver observes every write committed after this call returns.
    fn watch(&self, key: &str) -> watch::Receiver<u64>;
}

/// Per-key change fan-out shared by the backends
#[derive(Default)]
pub struct Notifier {
    channels: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `key`, creating its channel on first use
    pub fn subscribe(&self, key: &str) -> watch::Receiver<u64> {
        self.channels
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Publish a committed version of `key` to its subscribers
    pub fn publish(&self, key: &str, version: u64) {
        let mut channels = self.channels.lock();
        if let Some(tx) = channels.get(key) {
            if tx.receiver_count() == 0 {
                channels.remove(key);
            } else {
                tx.send_replace(version);
            }
        }
    }

    /// Number of keys with live subscriptions
    pub fn watched_keys(&self) -> usize {
        self.channels
            .lock()
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_delivers_after_subscribe() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe("pools/p1");
        notifier.publish("pools/p1", 4);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 4);
    }

    #[test]
    fn test_notifier_prunes_dead_channels() {
        let notifier = Notifier::new();
        let rx = notifier.subscribe("volumes/v1");
        assert_eq!(notifier.watched_keys(), 1);
        drop(rx);
        notifier.publish("volumes/v1", 1);
        assert_eq!(notifier.watched_keys(), 0);
        assert!(notifier.channels.lock().is_empty());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let notifier = Notifier::new();
        notifier.publish("pools/p1", 1);
        assert!(notifier.channels.lock().is_empty());
    }
}
