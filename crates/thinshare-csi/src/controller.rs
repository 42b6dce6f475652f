//! Attachment intent and convergence

use thinshare_common::types::require_non_empty;
use thinshare_common::{NodeName, Result};
use thinshare_state::{StateStore, VolumeAttachment};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Records per-volume attachment intent and waits for the reconciler
#[derive(Clone)]
pub struct AttachmentController {
    store: StateStore,
}

impl AttachmentController {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Ask for `volume_id` on `node` and wait until it is attached there.
    ///
    /// Repeated or concurrent calls for the same pair add `node` once.
    pub async fn stage(
        &self,
        volume_id: &str,
        node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        require_non_empty("volume id", volume_id)?;
        require_non_empty("node name", node.as_str())?;

        let current = self.store.get::<VolumeAttachment>(volume_id).await?;
        if !current.value.desired_nodes.contains(node) {
            self.store
                .atomic_update::<VolumeAttachment, _>(volume_id, |v| {
                    v.desired_nodes.insert(node.clone());
                    Ok(())
                })
                .await?;
            debug!("Node {} now wants volume {}", node, volume_id);
        }

        self.store
            .watch_until::<VolumeAttachment, _>(volume_id, cancel, |v| {
                v.observed_nodes.contains(node)
            })
            .await?;
        Ok(())
    }

    /// Withdraw `node`'s request for `volume_id` and wait until it is detached
    pub async fn unstage(
        &self,
        volume_id: &str,
        node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        require_non_empty("volume id", volume_id)?;
        require_non_empty("node name", node.as_str())?;

        let current = self.store.get::<VolumeAttachment>(volume_id).await?;
        if current.value.desired_nodes.contains(node) {
            self.store
                .atomic_update::<VolumeAttachment, _>(volume_id, |v| {
                    v.desired_nodes.remove(node);
                    Ok(())
                })
                .await?;
            debug!("Node {} released volume {}", node, volume_id);
        }

        self.store
            .watch_until::<VolumeAttachment, _>(volume_id, cancel, |v| {
                !v.observed_nodes.contains(node)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use thinshare_common::Error;

    fn n(name: &str) -> NodeName {
        NodeName::from(name)
    }

    /// Stand-in reconciler: copies desired to observed once
    async fn observe(store: &StateStore, volume_id: &str) {
        store
            .atomic_update::<VolumeAttachment, _>(volume_id, |v| {
                v.observed_nodes = v.desired_nodes.clone();
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stage_rejects_empty_volume_id() {
        let controller = AttachmentController::new(StateStore::in_memory());
        let err = controller
            .stage("", &n("n1"), &CancellationToken::new())
            .await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_stage_waits_for_observation() {
        let store = StateStore::in_memory();
        let controller = AttachmentController::new(store.clone());
        let cancel = CancellationToken::new();

        let stage = tokio::spawn({
            let controller = controller.clone();
            let cancel = cancel.clone();
            async move { controller.stage("vol1", &n("n1"), &cancel).await }
        });

        store
            .watch_until::<VolumeAttachment, _>("vol1", &cancel, |v| {
                v.desired_nodes.contains("n1")
            })
            .await
            .unwrap();
        assert!(!stage.is_finished());

        observe(&store, "vol1").await;
        stage.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_stage_adds_node_once() {
        let store = StateStore::in_memory();
        let controller = Arc::new(AttachmentController::new(store.clone()));
        let cancel = CancellationToken::new();

        let tasks = (0..2).map(|_| {
            let controller = controller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.stage("vol1", &n("n1"), &cancel).await })
        });
        let tasks: Vec<_> = tasks.collect();

        store
            .watch_until::<VolumeAttachment, _>("vol1", &cancel, |v| {
                v.desired_nodes.contains("n1")
            })
            .await
            .unwrap();
        observe(&store, "vol1").await;

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let volume = store.get::<VolumeAttachment>("vol1").await.unwrap().value;
        assert_eq!(volume.desired_nodes.len(), 1);
        assert!(volume.desired_nodes.contains("n1"));
    }

    #[tokio::test]
    async fn test_stage_then_unstage_before_convergence() {
        let store = StateStore::in_memory();
        let controller = AttachmentController::new(store.clone());

        let stage_cancel = CancellationToken::new();
        let stage = tokio::spawn({
            let controller = controller.clone();
            let cancel = stage_cancel.clone();
            async move { controller.stage("vol1", &n("n1"), &cancel).await }
        });

        let watcher = CancellationToken::new();
        store
            .watch_until::<VolumeAttachment, _>("vol1", &watcher, |v| {
                v.desired_nodes.contains("n1")
            })
            .await
            .unwrap();

        // Never observed, so unstage completes as soon as intent is withdrawn
        controller
            .unstage("vol1", &n("n1"), &CancellationToken::new())
            .await
            .unwrap();

        stage_cancel.cancel();
        let err = stage.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Canceled));

        let volume = store.get::<VolumeAttachment>("vol1").await.unwrap().value;
        assert!(!volume.desired_nodes.contains("n1"));
    }

    #[tokio::test]
    async fn test_repeated_stage_does_not_write() {
        let store = StateStore::in_memory();
        let controller = AttachmentController::new(store.clone());
        let cancel = CancellationToken::new();

        store
            .atomic_update::<VolumeAttachment, _>("vol1", |v| {
                v.desired_nodes.insert(n("n1"));
                v.observed_nodes.insert(n("n1"));
                Ok(())
            })
            .await
            .unwrap();

        controller.stage("vol1", &n("n1"), &cancel).await.unwrap();
        controller.stage("vol1", &n("n1"), &cancel).await.unwrap();
        assert_eq!(store.get::<VolumeAttachment>("vol1").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_unstage_canceled_while_waiting() {
        let store = StateStore::in_memory();
        let controller = AttachmentController::new(store.clone());
        store
            .atomic_update::<VolumeAttachment, _>("vol1", |v| {
                v.desired_nodes.insert(n("n1"));
                v.observed_nodes.insert(n("n1"));
                Ok(())
            })
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let unstage = tokio::spawn({
            let controller = controller.clone();
            let cancel = cancel.clone();
            async move { controller.unstage("vol1", &n("n1"), &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = unstage.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Canceled));
        let volume = store.get::<VolumeAttachment>("vol1").await.unwrap().value;
        assert!(!volume.desired_nodes.contains("n1"));
    }
}
