//! Cluster-replicated records
//!
//! [`PoolState`] is the unit of consistency for pool activation and blob
//! holders; [`VolumeAttachment`] carries per-volume attachment intent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thinshare_common::{Blob, Error, NodeName, Pool, Result};

/// A typed object stored under `"<KIND>/<name>"`
pub trait Record:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Send + Sync + 'static
{
    const KIND: &'static str;

    fn key(name: &str) -> String {
        format!("{}/{name}", Self::KIND)
    }

    fn prefix() -> String {
        format!("{}/", Self::KIND)
    }
}

/// A node that needs I/O access to a blob
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Holder {
    pub blob: String,
    pub node: NodeName,
}

impl Holder {
    pub fn new(blob: impl Into<String>, node: NodeName) -> Self {
        Self {
            blob: blob.into(),
            node,
        }
    }
}

/// Versioned activation state of one pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolState {
    /// Shared device holding the pool
    pub backing_device_path: PathBuf,
    /// Node holding the pool's LVM activation, if any
    pub active_on_node: Option<NodeName>,
    /// Blobs registered in the pool
    pub blobs: BTreeSet<String>,
    /// `(blob, node)` pairs needing I/O access
    pub holders: BTreeSet<Holder>,
}

impl Record for PoolState {
    const KIND: &'static str = "pools";
}

impl PoolState {
    /// Rebuild the pool identity from the record
    #[must_use]
    pub fn pool(&self, name: &str) -> Pool {
        Pool::new(name, self.backing_device_path.clone())
    }

    #[must_use]
    pub fn has_holders(&self) -> bool {
        !self.holders.is_empty()
    }

    /// Blobs with at least one holder, in name order
    #[must_use]
    pub fn blobs_with_holders(&self) -> Vec<String> {
        let mut blobs: Vec<String> = Vec::new();
        for holder in &self.holders {
            if blobs.last() != Some(&holder.blob) {
                blobs.push(holder.blob.clone());
            }
        }
        blobs
    }

    /// Nodes holding `blob`, in name order
    #[must_use]
    pub fn nodes_holding(&self, blob: &str) -> Vec<NodeName> {
        self.holders
            .iter()
            .filter(|h| h.blob == blob)
            .map(|h| h.node.clone())
            .collect()
    }

    #[must_use]
    pub fn has_holder(&self, blob: &str, node: &NodeName) -> bool {
        self.holders
            .iter()
            .any(|h| h.blob == blob && &h.node == node)
    }

    /// Record `node` as a holder of `blob`.
    ///
    /// Fails with `NotFound` if the blob is not registered in the pool.
    pub fn add_holder(&mut self, blob: &Blob, node: &NodeName) -> Result<bool> {
        if !self.blobs.contains(&blob.name) {
            return Err(Error::not_found(format!("blob {blob}")));
        }
        Ok(self.holders.insert(Holder::new(&blob.name, node.clone())))
    }

    pub fn remove_holder(&mut self, blob: &str, node: &NodeName) -> bool {
        self.holders.remove(&Holder::new(blob, node.clone()))
    }
}

/// Pool and blob backing a volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobBinding {
    pub pool: String,
    pub blob: String,
}

/// Per-volume attachment intent and progress
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeAttachment {
    /// Blob backing the volume; unset until the volume is provisioned
    pub binding: Option<BlobBinding>,
    /// Nodes that want the volume staged
    pub desired_nodes: BTreeSet<NodeName>,
    /// Nodes on which staging has completed (written by the reconciler)
    pub observed_nodes: BTreeSet<NodeName>,
}

impl Record for VolumeAttachment {
    const KIND: &'static str = "volumes";
}

impl VolumeAttachment {
    /// Check whether every desired node has been observed and nothing else
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.desired_nodes == self.observed_nodes
    }
}
