//! In-memory fakes of the physical operations
//!
//! [`RecordingOps`] implements every capability trait, records each call
//! in order and tracks which nodes have each pool active, so tests can
//! assert both the exact sequence and the single-active-node property.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thinshare_common::{Blob, Error, ExportId, NodeName, Pool, Result};
use thinshare_state::StateStore;
use tokio::sync::Notify;

use crate::manager::BlobManager;
use crate::ops::{ExportManager, PathManager, VolumeActivator};

/// One recorded physical operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Lockstart { pool: String, node: NodeName },
    ActivatePool { pool: String, node: NodeName },
    DeactivatePool { pool: String, node: NodeName },
    ActivateBlob { blob: String, node: NodeName },
    DeactivateBlob { blob: String, node: NodeName },
    StartServer { export: ExportId, device: PathBuf },
    StopServer { export: ExportId },
    ConnectClient { node: NodeName, export: ExportId },
    DisconnectClient { node: NodeName, export: ExportId },
    ConnectPath { blob: String, node: NodeName, device: PathBuf },
    DisconnectPath { blob: String, node: NodeName },
}

/// Recording implementation of all physical capabilities
#[derive(Default)]
pub struct RecordingOps {
    ops: Mutex<Vec<Op>>,
    active_pools: Mutex<HashMap<String, BTreeSet<NodeName>>>,
    max_concurrent_active: Mutex<usize>,
    failures: Mutex<Vec<Op>>,
    hangs: Mutex<Vec<Op>>,
    gates: Mutex<Vec<(Op, Arc<Notify>)>>,
    blob_sizes: Mutex<HashMap<String, u64>>,
}

impl RecordingOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a manager driving these fakes
    pub fn manager(self: &Arc<Self>, store: StateStore) -> BlobManager {
        BlobManager::new(store, self.clone(), self.clone(), self.clone(), "vg0")
    }

    /// Operations recorded so far
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    /// Drain the recorded operations
    pub fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Nodes with `pool` currently active
    pub fn active_nodes(&self, pool: &str) -> BTreeSet<NodeName> {
        self.active_pools.lock().get(pool).cloned().unwrap_or_default()
    }

    /// Largest number of nodes ever holding one pool active at once
    pub fn max_concurrent_active(&self) -> usize {
        *self.max_concurrent_active.lock()
    }

    /// Fail the next occurrence of `op` instead of recording it
    pub fn fail_once(&self, op: Op) {
        self.failures.lock().push(op);
    }

    /// Never complete the next occurrence of `op`
    pub fn hang_once(&self, op: Op) {
        self.hangs.lock().push(op);
    }

    /// Hold the next occurrence of `op` until the returned gate is notified
    pub fn gate_once(&self, op: Op) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().push((op, gate.clone()));
        gate
    }

    pub fn set_blob_size(&self, blob: &str, size: u64) {
        self.blob_sizes.lock().insert(blob.to_string(), size);
    }

    async fn record(&self, node: &NodeName, op: Op) -> Result<()> {
        let hang = {
            let mut hangs = self.hangs.lock();
            hangs
                .iter()
                .position(|h| h == &op)
                .map(|pos| hangs.remove(pos))
                .is_some()
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let gate = {
            let mut gates = self.gates.lock();
            gates
                .iter()
                .position(|(g, _)| g == &op)
                .map(|pos| gates.remove(pos).1)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        {
            let mut failures = self.failures.lock();
            if let Some(pos) = failures.iter().position(|f| f == &op) {
                failures.remove(pos);
                return Err(Error::command(node.as_str(), format!("{op:?}"), "injected failure"));
            }
        }

        match &op {
            Op::ActivatePool { pool, node } => {
                let mut active = self.active_pools.lock();
                let nodes = active.entry(pool.clone()).or_default();
                nodes.insert(node.clone());
                let mut max = self.max_concurrent_active.lock();
                *max = (*max).max(nodes.len());
            }
            Op::DeactivatePool { pool, node } => {
                if let Some(nodes) = self.active_pools.lock().get_mut(pool) {
                    nodes.remove(node);
                }
            }
            _ => {}
        }

        self.ops.lock().push(op);
        Ok(())
    }
}

/// Device a fake NBD client reports for `export`
pub fn nbd_device(export: &ExportId) -> PathBuf {
    PathBuf::from(format!("/dev/nbd-{}-{}", export.node, export.blob))
}

#[async_trait]
impl VolumeActivator for RecordingOps {
    async fn lockstart(&self, pool: &Pool, node: &NodeName) -> Result<()> {
        self.record(
            node,
            Op::Lockstart {
                pool: pool.name.clone(),
                node: node.clone(),
            },
        )
        .await
    }

    async fn activate_pool(&self, pool: &Pool, node: &NodeName) -> Result<()> {
        self.record(
            node,
            Op::ActivatePool {
                pool: pool.name.clone(),
                node: node.clone(),
            },
        )
        .await
    }

    async fn deactivate_pool(&self, pool: &Pool, node: &NodeName) -> Result<()> {
        self.record(
            node,
            Op::DeactivatePool {
                pool: pool.name.clone(),
                node: node.clone(),
            },
        )
        .await
    }

    async fn activate_blob(&self, blob: &Blob, node: &NodeName) -> Result<()> {
        self.record(
            node,
            Op::ActivateBlob {
                blob: blob.name.clone(),
                node: node.clone(),
            },
        )
        .await
    }

    async fn deactivate_blob(&self, blob: &Blob, node: &NodeName) -> Result<()> {
        self.record(
            node,
            Op::DeactivateBlob {
                blob: blob.name.clone(),
                node: node.clone(),
            },
        )
        .await
    }

    async fn blob_size(&self, blob: &Blob, _node: &NodeName) -> Result<u64> {
        self.blob_sizes
            .lock()
            .get(&blob.name)
            .copied()
            .ok_or_else(|| Error::not_found(format!("LV {}", blob.lv_name())))
    }
}

#[async_trait]
impl ExportManager for RecordingOps {
    async fn start_server(&self, export: &ExportId, device_path: &Path) -> Result<()> {
        self.record(
            &export.node,
            Op::StartServer {
                export: export.clone(),
                device: device_path.to_path_buf(),
            },
        )
        .await
    }

    async fn stop_server(&self, export: &ExportId) -> Result<()> {
        self.record(
            &export.node,
            Op::StopServer {
                export: export.clone(),
            },
        )
        .await
    }

    async fn connect_client(&self, node: &NodeName, export: &ExportId) -> Result<PathBuf> {
        self.record(
            node,
            Op::ConnectClient {
                node: node.clone(),
                export: export.clone(),
            },
        )
        .await?;
        Ok(nbd_device(export))
    }

    async fn disconnect_client(&self, node: &NodeName, export: &ExportId) -> Result<()> {
        self.record(
            node,
            Op::DisconnectClient {
                node: node.clone(),
                export: export.clone(),
            },
        )
        .await
    }
}

#[async_trait]
impl PathManager for RecordingOps {
    async fn connect(&self, blob: &Blob, node: &NodeName, device_path: &Path) -> Result<()> {
        self.record(
            node,
            Op::ConnectPath {
                blob: blob.name.clone(),
                node: node.clone(),
                device: device_path.to_path_buf(),
            },
        )
        .await
    }

    async fn disconnect(&self, blob: &Blob, node: &NodeName) -> Result<()> {
        self.record(
            node,
            Op::DisconnectPath {
                blob: blob.name.clone(),
                node: node.clone(),
            },
        )
        .await
    }
}
