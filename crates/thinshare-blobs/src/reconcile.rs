//! Volume reconcile loop: drives blob holders toward each volume's
//! desired nodes and publishes the observed set once they match.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thinshare_common::{Error, NodeName, Result};
use thinshare_state::VolumeAttachment;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::BlobManager;

/// Reconciles [`VolumeAttachment`] records against pool holders
pub struct VolumeReconciler {
    manager: Arc<BlobManager>,
}

impl VolumeReconciler {
    pub fn new(manager: Arc<BlobManager>) -> Self {
        Self { manager }
    }

    /// Bring one volume's holders in line with its desired nodes.
    ///
    /// The observed set is published only if the desired set is unchanged
    /// since the pass started; otherwise the next pass publishes.
    pub async fn reconcile_volume(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let store = self.manager.store();
        let record = store.get::<VolumeAttachment>(volume_id).await?.value;

        let Some(binding) = record.binding.as_ref() else {
            debug!("Volume {} has no blob yet, skipping", volume_id);
            return Ok(());
        };

        let blob = self.manager.blob(&binding.pool, &binding.blob).await?;
        let desired = record.desired_nodes.clone();
        let state = self.manager.pool_state(&binding.pool).await?.value;

        for node in &desired {
            if !state.has_holder(&blob.name, node) {
                self.manager.attach_blob(&blob, node, cancel).await?;
            }
        }
        for node in state.nodes_holding(&blob.name) {
            if !desired.contains(&node) {
                self.manager.detach_blob(&blob, &node, cancel).await?;
            }
        }

        if let [only] = desired.iter().collect::<Vec<_>>().as_slice() {
            self.manager
                .optimize_attachment_for_node(&blob, only, cancel)
                .await?;
        }

        if record.observed_nodes != desired {
            let committed = store
                .atomic_update::<VolumeAttachment, _>(volume_id, |v| {
                    if v.desired_nodes == desired {
                        v.observed_nodes = desired.clone();
                    }
                    Ok(())
                })
                .await?;
            if committed.value.observed_nodes == desired {
                info!(
                    "Volume {} observed on [{}]",
                    volume_id,
                    join_nodes(&desired)
                );
            } else {
                debug!("Volume {} intent changed during reconcile", volume_id);
            }
        }

        Ok(())
    }

    /// Reconcile every volume; a failing volume does not stop the rest.
    ///
    /// Returns the number of volumes that failed. Cancellation stops the
    /// pass with `Canceled`.
    pub async fn reconcile_all(&self, cancel: &CancellationToken) -> Result<usize> {
        let volumes = self.manager.store().list::<VolumeAttachment>().await?;
        let mut failed = 0;

        for volume_id in &volumes {
            match self.reconcile_volume(volume_id, cancel).await {
                Ok(()) => {}
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => {
                    warn!("Failed to reconcile volume {}: {}", volume_id, e);
                    failed += 1;
                }
            }
        }

        Ok(failed)
    }

    /// Reconcile every `interval` until `cancel` fires
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Reconcile loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.reconcile_all(&cancel).await {
                Ok(0) => {}
                Ok(failed) => debug!("{} volume(s) left unreconciled this pass", failed),
                Err(Error::Canceled) => {
                    info!("Reconcile loop stopped mid-pass");
                    return;
                }
                Err(e) => warn!("Failed to list volumes: {}", e),
            }
        }
    }
}

fn join_nodes(nodes: &BTreeSet<NodeName>) -> String {
    nodes
        .iter()
        .map(NodeName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
