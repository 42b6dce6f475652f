//! Blob holder management
//!
//! A holder is a node that needs I/O access to a blob. Attaching a holder
//! wires up either a direct path to the thin LV (on the pool's active
//! node) or an NBD client to the active node's export. Physical steps run
//! first and the holder record is committed only once they succeed, so a
//! recorded holder always has a working path.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thinshare_common::types::require_non_empty;
use thinshare_common::{Blob, Error, ExportId, NodeName, Pool, Result};
use thinshare_state::{PoolState, StateStore, Versioned};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ops::{ExportManager, PathManager, VolumeActivator};

/// Blob and pool activation engine
pub struct BlobManager {
    pub(crate) store: StateStore,
    pub(crate) volumes: Arc<dyn VolumeActivator>,
    pub(crate) exports: Arc<dyn ExportManager>,
    pub(crate) paths: Arc<dyn PathManager>,
    pub(crate) vg_name: String,
    /// Serializes migrations and holder changes per pool
    pool_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BlobManager {
    pub fn new(
        store: StateStore,
        volumes: Arc<dyn VolumeActivator>,
        exports: Arc<dyn ExportManager>,
        paths: Arc<dyn PathManager>,
        vg_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            volumes,
            exports,
            paths,
            vg_name: vg_name.into(),
            pool_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub(crate) async fn lock_pool(
        &self,
        pool: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = self
            .pool_locks
            .lock()
            .entry(pool.to_string())
            .or_default()
            .clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Canceled),
            guard = lock.lock_owned() => Ok(guard),
        }
    }

    /// Current state of `pool`
    pub async fn pool_state(&self, pool: &str) -> Result<Versioned<PoolState>> {
        Ok(self.store.get::<PoolState>(pool).await?)
    }

    /// Resolve a registered blob, failing with `NotFound` otherwise
    pub async fn blob(&self, pool: &str, blob: &str) -> Result<Blob> {
        let state = self.pool_state(pool).await?.value;
        if !state.blobs.contains(blob) {
            return Err(Error::not_found(format!("blob {pool}/{blob}")));
        }
        Ok(state.pool(pool).blob(blob))
    }

    // ── Registration ──

    /// Register `blob` in `pool`, recording the pool's backing device on
    /// first use.
    pub async fn register_blob(&self, pool: &Pool, blob: &str) -> Result<Blob> {
        require_non_empty("pool name", &pool.name)?;
        require_non_empty("blob name", blob)?;

        self.store
            .atomic_update::<PoolState, _>(&pool.name, |state| {
                if state.backing_device_path.as_os_str().is_empty() {
                    state.backing_device_path = pool.backing_device_path.clone();
                } else if state.backing_device_path != pool.backing_device_path {
                    return Err(Error::invalid_argument(format!(
                        "pool {} is backed by {}, not {}",
                        pool.name,
                        state.backing_device_path.display(),
                        pool.backing_device_path.display()
                    )));
                }
                state.blobs.insert(blob.to_string());
                Ok(())
            })
            .await?;

        debug!("Registered blob {}/{}", pool.name, blob);
        Ok(pool.blob(blob))
    }

    /// Remove `blob` from `pool`; refused while any node holds it
    pub async fn unregister_blob(
        &self,
        pool: &str,
        blob: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = self.lock_pool(pool, cancel).await?;

        self.store
            .atomic_update::<PoolState, _>(pool, |state| {
                let holders = state.nodes_holding(blob);
                if !holders.is_empty() {
                    return Err(Error::aborted(format!(
                        "blob {pool}/{blob} is still held by {} node(s)",
                        holders.len()
                    )));
                }
                state.blobs.remove(blob);
                Ok(())
            })
            .await?;

        debug!("Unregistered blob {}/{}", pool, blob);
        Ok(())
    }

    /// Size of `blob` in bytes, as reported by LVM on `node`
    pub async fn blob_size(&self, blob: &Blob, node: &NodeName) -> Result<u64> {
        self.volumes.blob_size(blob, node).await
    }

    // ── Holders ──

    /// Give `node` I/O access to `blob`.
    ///
    /// Activates the pool on `node` if it is not active anywhere. Returns
    /// the device `node`'s path was connected to. Ends with `Canceled` as
    /// soon as `cancel` fires; steps already taken are left in place.
    pub async fn attach_blob(
        &self,
        blob: &Blob,
        node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let _guard = self.lock_pool(&blob.pool.name, cancel).await?;

        let state = self.pool_state(&blob.pool.name).await?.value;
        let mut planned = state.clone();
        planned.add_holder(blob, node)?;

        let lv_path = blob.lv_path(&self.vg_name);

        let device = match &state.active_on_node {
            None => {
                self.migrate_pool_locked(&blob.pool, &planned, node, cancel)
                    .await?;
                lv_path
            }
            Some(active) if active == node => {
                step(cancel, self.volumes.activate_blob(blob, node)).await?;
                step(cancel, self.paths.connect(blob, node, &lv_path)).await?;
                lv_path
            }
            Some(active) => {
                let export = ExportId::new(active.clone(), &blob.name);
                step(cancel, self.volumes.activate_blob(blob, active)).await?;
                step(cancel, self.exports.start_server(&export, &lv_path)).await?;
                let device = step(cancel, self.exports.connect_client(node, &export)).await?;
                step(cancel, self.paths.connect(blob, node, &device)).await?;
                device
            }
        };

        self.store
            .atomic_update::<PoolState, _>(&blob.pool.name, |s| {
                s.add_holder(blob, node)?;
                Ok(())
            })
            .await?;

        info!("Attached blob {} to node {}", blob, node);
        Ok(device)
    }

    /// Revoke `node`'s I/O access to `blob`.
    ///
    /// Tears down whatever the last holder leaves unused: the export
    /// server, the blob LV and finally the pool LV.
    pub async fn detach_blob(
        &self,
        blob: &Blob,
        node: &NodeName,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = self.lock_pool(&blob.pool.name, cancel).await?;

        let state = self.pool_state(&blob.pool.name).await?.value;
        if !state.has_holder(&blob.name, node) {
            return Ok(());
        }
        let active = state.active_on_node.clone().ok_or_else(|| {
            Error::internal(format!("pool {} has holders but no active node", blob.pool))
        })?;

        let export = ExportId::new(active.clone(), &blob.name);
        let remaining: Vec<NodeName> = state
            .nodes_holding(&blob.name)
            .into_iter()
            .filter(|n| n != node)
            .collect();

        step(cancel, self.paths.disconnect(blob, node)).await?;
        if node != &active {
            step(cancel, self.exports.disconnect_client(node, &export)).await?;
        }
        if remaining.iter().all(|n| n == &active) {
            step(cancel, self.exports.stop_server(&export)).await?;
        }
        if remaining.is_empty() {
            step(cancel, self.volumes.deactivate_blob(blob, &active)).await?;
        }

        let last_holder = state.holders.len() == 1;
        if last_holder {
            step(cancel, self.volumes.deactivate_pool(&blob.pool, &active)).await?;
        }

        self.store
            .atomic_update::<PoolState, _>(&blob.pool.name, |s| {
                if s.active_on_node.as_ref() != Some(&active) {
                    return Err(Error::aborted(format!(
                        "pool {} moved off {} during detach",
                        blob.pool, active
                    )));
                }
                s.remove_holder(&blob.name, node);
                if !s.has_holders() {
                    s.active_on_node = None;
                }
                Ok(())
            })
            .await?;

        info!("Detached blob {} from node {}", blob, node);
        Ok(())
    }
}

/// Await one physical step, giving up as soon as `cancel` fires.
///
/// Dropping the step's future kills any helper process it spawned.
pub(crate) async fn step<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Canceled),
        result = op => result,
    }
}
