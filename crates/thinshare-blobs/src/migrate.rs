//! Pool migration
//!
//! Moving a pool's activation from one node to another tears down every
//! path, export and LV on the old node, brings them back up on the new
//! node, and only then commits the new active node. Every step is
//! idempotent, so a failed or canceled migration is recovered by running
//! it again from the start.

use thinshare_common::{Blob, Error, ExportId, NodeName, Pool, Result};
use thinshare_state::PoolState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::{BlobManager, step};

impl BlobManager {
    /// Give `node` the best I/O performance for `blob` by activating its
    /// pool there. Does nothing if the pool has no holders.
    pub async fn optimize_attachment_for_node(
        &self,
        blob: &Blob,
        node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = self.lock_pool(&blob.pool.name, cancel).await?;

        let state = self.pool_state(&blob.pool.name).await?.value;
        if !state.has_holders() {
            return Ok(());
        }
        self.migrate_pool_locked(&state.pool(&blob.pool.name), &state, node, cancel)
            .await
    }

    /// Make `to_node` the active node of `pool`.
    ///
    /// Succeeds immediately if the pool is already active there, or is
    /// inactive with no holders. Ends with `Canceled` as soon as `cancel`
    /// fires; nothing is committed and the steps taken are left in place.
    pub async fn migrate_pool(
        &self,
        pool: &str,
        to_node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = self.lock_pool(pool, cancel).await?;

        let state = self.pool_state(pool).await?.value;
        self.migrate_pool_locked(&state.pool(pool), &state, to_node, cancel)
            .await
    }

    /// Migrate from `state`, which the caller read while holding the pool lock
    pub(crate) async fn migrate_pool_locked(
        &self,
        pool: &Pool,
        state: &PoolState,
        to_node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let from_node = state.active_on_node.as_ref();
        if from_node == Some(to_node) || (from_node.is_none() && !state.has_holders()) {
            return Ok(());
        }

        info!(
            pool = %pool.name,
            "Migrating pool from {} to {}",
            from_node.map_or("<none>", NodeName::as_str),
            to_node
        );

        // Starting the lockspace is slow; do it before anything is torn down
        step(cancel, self.volumes.lockstart(pool, to_node)).await?;

        if let Some(from) = from_node {
            self.migrate_pool_down(pool, state, from, cancel).await?;
        }
        if state.has_holders() {
            self.migrate_pool_up(pool, state, to_node, cancel).await?;
        }

        let expected = state.active_on_node.clone();
        let new_active = state.has_holders().then(|| to_node.clone());
        self.store
            .atomic_update::<PoolState, _>(&pool.name, |s| {
                if s.active_on_node != expected {
                    return Err(Error::aborted(format!(
                        "pool {} changed active node during migration",
                        pool.name
                    )));
                }
                s.active_on_node = new_active.clone();
                Ok(())
            })
            .await?;

        info!(
            pool = %pool.name,
            "Pool now active on {:?}",
            new_active.as_ref().map(NodeName::as_str)
        );
        Ok(())
    }

    async fn migrate_pool_down(
        &self,
        pool: &Pool,
        state: &PoolState,
        from: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for blob_name in state.blobs_with_holders() {
            let blob = pool.blob(&blob_name);
            let export = ExportId::new(from.clone(), &blob_name);

            for node in state.nodes_holding(&blob_name) {
                step(cancel, self.paths.disconnect(&blob, &node)).await?;
                if &node != from {
                    step(cancel, self.exports.disconnect_client(&node, &export)).await?;
                }
            }

            step(cancel, self.exports.stop_server(&export)).await?;
            step(cancel, self.volumes.deactivate_blob(&blob, from)).await?;
            debug!("Tore down blob {} on {}", blob, from);
        }

        step(cancel, self.volumes.deactivate_pool(pool, from)).await
    }

    async fn migrate_pool_up(
        &self,
        pool: &Pool,
        state: &PoolState,
        to: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        step(cancel, self.volumes.activate_pool(pool, to)).await?;

        for blob_name in state.blobs_with_holders() {
            let blob = pool.blob(&blob_name);
            let lv_path = blob.lv_path(&self.vg_name);

            step(cancel, self.volumes.activate_blob(&blob, to)).await?;

            let mut others = state.nodes_holding(&blob_name);
            if let Some(pos) = others.iter().position(|n| n == to) {
                others.remove(pos);
                step(cancel, self.paths.connect(&blob, to, &lv_path)).await?;
            }

            if !others.is_empty() {
                let export = ExportId::new(to.clone(), &blob_name);
                step(cancel, self.exports.start_server(&export, &lv_path)).await?;
                for node in &others {
                    let device = step(cancel, self.exports.connect_client(node, &export)).await?;
                    step(cancel, self.paths.connect(&blob, node, &device)).await?;
                }
            }
            debug!("Brought up blob {} on {}", blob, to);
        }

        Ok(())
    }
}
