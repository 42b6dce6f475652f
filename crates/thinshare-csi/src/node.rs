//! CSI Node service.
//!
//! Serves one node's identity from configuration. Every instance must share
//! the agent's [`thinshare_state::StateStore`], since that store is the only
//! place intent and holders are coordinated.
//! Stage and unstage are idempotent and map their errors onto gRPC status
//! codes through [`thinshare_common::Error`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thinshare_common::types::require_non_empty;
use thinshare_common::NodeName;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::info;

use crate::controller::AttachmentController;

/// Request to stage a volume on this node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: String,
    /// Global staging path for the volume
    pub staging_target_path: String,
}

/// Request to unstage a volume from this node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUnstageVolumeRequest {
    pub volume_id: String,
    pub staging_target_path: String,
}

/// Node service: stage / unstage on the local node
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume; succeeds at once if it is already staged here.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), Status>;

    /// Unstage a volume; succeeds at once if it is not staged here.
    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), Status>;
}

/// [`CsiNode`] backed by an [`AttachmentController`]
pub struct NodeService {
    controller: AttachmentController,
    local_node: NodeName,
    shutdown: CancellationToken,
}

impl NodeService {
    /// `shutdown` aborts every in-flight wait when cancelled
    pub fn new(
        controller: AttachmentController,
        local_node: NodeName,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            controller,
            local_node,
            shutdown,
        }
    }

    pub fn local_node(&self) -> &NodeName {
        &self.local_node
    }
}

#[async_trait]
impl CsiNode for NodeService {
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), Status> {
        require_non_empty("volume id", &req.volume_id)?;

        let cancel = self.shutdown.child_token();
        self.controller
            .stage(&req.volume_id, &self.local_node, &cancel)
            .await?;

        info!("Staged volume {} on {}", req.volume_id, self.local_node);
        Ok(())
    }

    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), Status> {
        require_non_empty("volume id", &req.volume_id)?;
        require_non_empty("staging target path", &req.staging_target_path)?;

        let cancel = self.shutdown.child_token();
        self.controller
            .unstage(&req.volume_id, &self.local_node, &cancel)
            .await?;

        info!("Unstaged volume {} from {}", req.volume_id, self.local_node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use thinshare_blobs::testing::RecordingOps;
    use thinshare_blobs::VolumeReconciler;
    use thinshare_common::Pool;
    use thinshare_state::{BlobBinding, PoolState, StateStore, VolumeAttachment};
    use tonic::Code;

    fn service(store: StateStore, node: &str) -> NodeService {
        NodeService::new(
            AttachmentController::new(store),
            NodeName::from(node),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_stage_requires_volume_id() {
        let node = service(StateStore::in_memory(), "n1");
        let status = node
            .stage_volume(NodeStageVolumeRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("must specify volume id"));
    }

    #[tokio::test]
    async fn test_unstage_requires_both_fields() {
        let node = service(StateStore::in_memory(), "n1");

        let status = node
            .unstage_volume(NodeUnstageVolumeRequest {
                volume_id: String::new(),
                staging_target_path: "/staging".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = node
            .unstage_volume(NodeUnstageVolumeRequest {
                volume_id: "vol1".into(),
                staging_target_path: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("staging target path"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_stage() {
        let shutdown = CancellationToken::new();
        let node = Arc::new(NodeService::new(
            AttachmentController::new(StateStore::in_memory()),
            NodeName::from("n1"),
            shutdown.clone(),
        ));

        let stage = tokio::spawn({
            let node = node.clone();
            async move {
                node.stage_volume(NodeStageVolumeRequest {
                    volume_id: "vol1".into(),
                    staging_target_path: "/staging".into(),
                })
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let status = stage.await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stage_and_unstage_through_reconciler() {
        let store = StateStore::in_memory();
        let ops = RecordingOps::new();
        let manager = Arc::new(ops.manager(store.clone()));
        manager
            .register_blob(&Pool::new("p1", "/dev/sdb"), "b1")
            .await
            .unwrap();
        store
            .atomic_update::<VolumeAttachment, _>("vol1", |v| {
                v.binding = Some(BlobBinding {
                    pool: "p1".into(),
                    blob: "b1".into(),
                });
                Ok(())
            })
            .await
            .unwrap();

        let stop = CancellationToken::new();
        let reconciler = VolumeReconciler::new(manager.clone());
        let reconcile = tokio::spawn({
            let stop = stop.clone();
            async move { reconciler.run(Duration::from_millis(5), stop).await }
        });

        let node_a = service(store.clone(), "node-a");
        let node_c = service(store.clone(), "node-c");
        let stage = |id: &str| NodeStageVolumeRequest {
            volume_id: id.into(),
            staging_target_path: "/staging".into(),
        };
        let unstage = |id: &str| NodeUnstageVolumeRequest {
            volume_id: id.into(),
            staging_target_path: "/staging".into(),
        };

        node_a.stage_volume(stage("vol1")).await.unwrap();
        node_c.stage_volume(stage("vol1")).await.unwrap();
        let pool = store.get::<PoolState>("p1").await.unwrap().value;
        assert_eq!(pool.nodes_holding("b1").len(), 2);

        node_a.unstage_volume(unstage("vol1")).await.unwrap();
        node_c.unstage_volume(unstage("vol1")).await.unwrap();
        let pool = store.get::<PoolState>("p1").await.unwrap().value;
        assert!(!pool.has_holders());
        assert_eq!(pool.active_on_node, None);
        assert!(ops.active_nodes("p1").is_empty());

        stop.cancel();
        reconcile.await.unwrap();
    }
}
