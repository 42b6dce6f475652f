//! In-process object backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::watch;

use crate::backend::{Notifier, ObjectBackend, Versioned};
use crate::error::{StateError, StateResult};

/// Object backend held entirely in memory.
///
/// Linearizable within one process; used by tests and single-node setups.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, Versioned<Vec<u8>>>>,
    notifier: Notifier,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StateResult<Option<Versioned<Vec<u8>>>> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected_version: u64,
        data: Vec<u8>,
    ) -> StateResult<u64> {
        let version = {
            let mut objects = self.objects.write();
            let current = objects.get(key).map_or(0, |v| v.version);
            if current != expected_version {
                return Err(StateError::Conflict {
                    key: key.to_string(),
                    expected: expected_version,
                    found: current,
                });
            }
            let version = current + 1;
            objects.insert(
                key.to_string(),
                Versioned {
                    version,
                    value: data,
                },
            );
            version
        };
        self.notifier.publish(key, version);
        Ok(version)
    }

    async fn list(&self, prefix: &str) -> StateResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .map_while(|(k, _)| k.starts_with(prefix).then(|| k.clone()))
            .collect())
    }

    fn watch(&self, key: &str) -> watch::Receiver<u64> {
        self.notifier.subscribe(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_put_versions() {
        let backend = MemoryBackend::new();
        assert!(backend.get("pools/p1").await.unwrap().is_none());

        assert_eq!(
            backend.compare_and_put("pools/p1", 0, b"a".to_vec()).await.unwrap(),
            1
        );
        assert_eq!(
            backend.compare_and_put("pools/p1", 1, b"b".to_vec()).await.unwrap(),
            2
        );

        let stale = backend.compare_and_put("pools/p1", 1, b"c".to_vec()).await;
        assert!(matches!(
            stale,
            Err(StateError::Conflict {
                expected: 1,
                found: 2,
                ..
            })
        ));

        let current = backend.get("pools/p1").await.unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.value, b"b".to_vec());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let backend = MemoryBackend::new();
        for key in ["pools/p1", "volumes/v2", "volumes/v1", "pools/p2"] {
            backend.compare_and_put(key, 0, Vec::new()).await.unwrap();
        }
        assert_eq!(
            backend.list("volumes/").await.unwrap(),
            vec!["volumes/v1".to_string(), "volumes/v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_watch_sees_commit() {
        let backend = MemoryBackend::new();
        let mut rx = backend.watch("volumes/v1");
        backend
            .compare_and_put("volumes/v1", 0, b"{}".to_vec())
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
