//! Physical operation capabilities
//!
//! Each call must be idempotent: activating an active LV, stopping a
//! stopped export or disconnecting an absent path all succeed without
//! doing anything. Migration replays rely on it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thinshare_common::{Blob, ExportId, NodeName, Pool, Result};

/// LVM activation of pools and blobs on a node
#[async_trait]
pub trait VolumeActivator: Send + Sync {
    /// Start the VG lockspace on `node` (slow; done ahead of activation)
    async fn lockstart(&self, pool: &Pool, node: &NodeName) -> Result<()>;

    /// Activate the thin pool LV on `node`
    async fn activate_pool(&self, pool: &Pool, node: &NodeName) -> Result<()>;

    /// Deactivate the thin pool LV on `node`
    async fn deactivate_pool(&self, pool: &Pool, node: &NodeName) -> Result<()>;

    /// Activate the blob's thin LV on `node`
    async fn activate_blob(&self, blob: &Blob, node: &NodeName) -> Result<()>;

    /// Deactivate the blob's thin LV on `node`
    async fn deactivate_blob(&self, blob: &Blob, node: &NodeName) -> Result<()>;

    /// Size of the blob in bytes, queried from `node`
    async fn blob_size(&self, blob: &Blob, node: &NodeName) -> Result<u64>;
}

/// NBD export of a blob from the pool's active node
#[async_trait]
pub trait ExportManager: Send + Sync {
    /// Serve `device_path` as `export` on `export.node`
    async fn start_server(&self, export: &ExportId, device_path: &Path) -> Result<()>;

    async fn stop_server(&self, export: &ExportId) -> Result<()>;

    /// Connect `node` to `export`, returning the local NBD device
    async fn connect_client(&self, node: &NodeName, export: &ExportId) -> Result<PathBuf>;

    async fn disconnect_client(&self, node: &NodeName, export: &ExportId) -> Result<()>;
}

/// dm-multipath path of a blob on a node
#[async_trait]
pub trait PathManager: Send + Sync {
    /// Point `node`'s path for `blob` at `device_path`
    async fn connect(&self, blob: &Blob, node: &NodeName, device_path: &Path) -> Result<()>;

    async fn disconnect(&self, blob: &Blob, node: &NodeName) -> Result<()>;
}
