//! Script-backed physical operations
//!
//! Each capability drives one helper script through a [`NodeCommand`]
//! runner. The scripts themselves are responsible for idempotency.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thinshare_common::{Blob, Error, ExportId, NodeName, Pool, Result};

use crate::command::NodeCommand;
use crate::ops::{ExportManager, PathManager, VolumeActivator};

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Parse the byte size printed by `lvs --units b --nosuffix --noheadings`
pub fn parse_lv_size(output: &str) -> Result<u64> {
    let size = output.trim();
    size.parse::<u64>()
        .map_err(|e| Error::internal(format!("failed to parse LV size {size:?}: {e}")))
}

// ── LVM ──

/// LVM activation through the `lvm` helper script.
///
/// Invoked as `<script> <action> <vg> <lv> <backing-device>`.
pub struct LvmScript {
    runner: Arc<dyn NodeCommand>,
    script: PathBuf,
    vg_name: String,
}

impl LvmScript {
    pub fn new(runner: Arc<dyn NodeCommand>, script: PathBuf, vg_name: impl Into<String>) -> Self {
        Self {
            runner,
            script,
            vg_name: vg_name.into(),
        }
    }

    async fn run(&self, node: &NodeName, action: &str, lv: String, pool: &Pool) -> Result<()> {
        let args = vec![
            action.to_string(),
            self.vg_name.clone(),
            lv,
            path_arg(&pool.backing_device_path),
        ];
        self.runner.run(node, &path_arg(&self.script), &args).await?;
        Ok(())
    }
}

#[async_trait]
impl VolumeActivator for LvmScript {
    async fn lockstart(&self, pool: &Pool, node: &NodeName) -> Result<()> {
        self.run(node, "lockstart", pool.thin_pool_lv_name(), pool).await
    }

    async fn activate_pool(&self, pool: &Pool, node: &NodeName) -> Result<()> {
        self.run(node, "activate-pool", pool.thin_pool_lv_name(), pool)
            .await
    }

    async fn deactivate_pool(&self, pool: &Pool, node: &NodeName) -> Result<()> {
        self.run(node, "deactivate-pool", pool.thin_pool_lv_name(), pool)
            .await
    }

    async fn activate_blob(&self, blob: &Blob, node: &NodeName) -> Result<()> {
        self.run(node, "activate", blob.lv_name(), &blob.pool).await
    }

    async fn deactivate_blob(&self, blob: &Blob, node: &NodeName) -> Result<()> {
        self.run(node, "deactivate", blob.lv_name(), &blob.pool)
            .await
    }

    async fn blob_size(&self, blob: &Blob, node: &NodeName) -> Result<u64> {
        let args = vec![
            "--devices".to_string(),
            path_arg(&blob.pool.backing_device_path),
            "--options".to_string(),
            "lv_size".to_string(),
            "--units".to_string(),
            "b".to_string(),
            "--nosuffix".to_string(),
            "--noheadings".to_string(),
            format!("{}/{}", self.vg_name, blob.lv_name()),
        ];
        let output = self.runner.run(node, "lvs", &args).await?;
        parse_lv_size(&output)
    }
}

// ── NBD ──

/// NBD exports through the `nbd` helper script.
///
/// The server side runs on the exporting node, the client side on the
/// consuming node. `connect-client` prints the NBD device it attached.
pub struct NbdScript {
    runner: Arc<dyn NodeCommand>,
    script: PathBuf,
}

impl NbdScript {
    pub fn new(runner: Arc<dyn NodeCommand>, script: PathBuf) -> Self {
        Self { runner, script }
    }

    async fn run(&self, node: &NodeName, args: Vec<String>) -> Result<String> {
        self.runner.run(node, &path_arg(&self.script), &args).await
    }
}

#[async_trait]
impl ExportManager for NbdScript {
    async fn start_server(&self, export: &ExportId, device_path: &Path) -> Result<()> {
        self.run(
            &export.node,
            vec![
                "start-server".into(),
                export.blob.clone(),
                path_arg(device_path),
            ],
        )
        .await?;
        Ok(())
    }

    async fn stop_server(&self, export: &ExportId) -> Result<()> {
        self.run(&export.node, vec!["stop-server".into(), export.blob.clone()])
            .await?;
        Ok(())
    }

    async fn connect_client(&self, node: &NodeName, export: &ExportId) -> Result<PathBuf> {
        let output = self
            .run(
                node,
                vec![
                    "connect-client".into(),
                    export.node.to_string(),
                    export.blob.clone(),
                ],
            )
            .await?;

        let device = output.trim();
        if device.is_empty() {
            return Err(Error::internal(format!(
                "nbd client for {export} on {node} reported no device"
            )));
        }
        Ok(PathBuf::from(device))
    }

    async fn disconnect_client(&self, node: &NodeName, export: &ExportId) -> Result<()> {
        self.run(
            node,
            vec![
                "disconnect-client".into(),
                export.node.to_string(),
                export.blob.clone(),
            ],
        )
        .await?;
        Ok(())
    }
}

// ── dm-multipath ──

/// dm-multipath paths through the `multipath` helper script.
///
/// Invoked as `<script> connect <vg> <lv> <device>` and
/// `<script> disconnect <vg> <lv>` on the node owning the path.
pub struct MultipathScript {
    runner: Arc<dyn NodeCommand>,
    script: PathBuf,
    vg_name: String,
}

impl MultipathScript {
    pub fn new(runner: Arc<dyn NodeCommand>, script: PathBuf, vg_name: impl Into<String>) -> Self {
        Self {
            runner,
            script,
            vg_name: vg_name.into(),
        }
    }
}

#[async_trait]
impl PathManager for MultipathScript {
    async fn connect(&self, blob: &Blob, node: &NodeName, device_path: &Path) -> Result<()> {
        let args = vec![
            "connect".to_string(),
            self.vg_name.clone(),
            blob.lv_name(),
            path_arg(device_path),
        ];
        self.runner.run(node, &path_arg(&self.script), &args).await?;
        Ok(())
    }

    async fn disconnect(&self, blob: &Blob, node: &NodeName) -> Result<()> {
        let args = vec!["disconnect".to_string(), self.vg_name.clone(), blob.lv_name()];
        self.runner.run(node, &path_arg(&self.script), &args).await?;
        Ok(())
    }
}
