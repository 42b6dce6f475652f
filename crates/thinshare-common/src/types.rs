//! Core type definitions for thinshare
//!
//! Identifiers for nodes, pools, blobs and remote exports, plus the naming
//! rules that map them onto LVM objects.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Identifier of a cluster node
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// Create a node name, rejecting empty identifiers
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        require_non_empty("node name", &name)?;
        Ok(Self(name))
    }

    /// Get the node name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for NodeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A shared thin-provisioning domain backed by one block device
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pool {
    /// Unique pool name
    pub name: String,
    /// Shared block device holding the pool's LVM PV
    pub backing_device_path: PathBuf,
}

impl Pool {
    pub fn new(name: impl Into<String>, backing_device_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            backing_device_path: backing_device_path.into(),
        }
    }

    /// Name of the LVM thin *pool* LV
    #[must_use]
    pub fn thin_pool_lv_name(&self) -> String {
        format!("{}-thinpool", self.name)
    }

    /// Reference a blob inside this pool
    #[must_use]
    pub fn blob(&self, name: impl Into<String>) -> Blob {
        Blob {
            name: name.into(),
            pool: self.clone(),
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A thin logical volume inside exactly one pool
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob {
    /// Name, unique within the pool
    pub name: String,
    /// Owning pool
    pub pool: Pool,
}

impl Blob {
    /// Name of the LVM thin LV backing this blob
    #[must_use]
    pub fn lv_name(&self) -> String {
        format!("{}-{}", self.pool.name, self.name)
    }

    /// Device path of the thin LV once it is active on a node
    #[must_use]
    pub fn lv_path(&self, vg_name: &str) -> PathBuf {
        PathBuf::from(format!("/dev/{vg_name}/{}", self.lv_name()))
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool.name, self.name)
    }
}

/// Identity of one remote-export endpoint: `node` exports `blob`'s device
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExportId {
    /// Exporting node (always the pool's active node)
    pub node: NodeName,
    /// Exported blob
    pub blob: String,
}

impl ExportId {
    pub fn new(node: NodeName, blob: impl Into<String>) -> Self {
        Self {
            node,
            blob: blob.into(),
        }
    }
}

impl fmt::Display for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.blob)
    }
}

/// Reject an empty request identifier with `InvalidArgument`
pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_argument(format!("must specify {field}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_rejects_empty() {
        assert!(matches!(NodeName::new(""), Err(Error::InvalidArgument(_))));
        assert_eq!(NodeName::new("node-a").unwrap().as_str(), "node-a");
    }

    #[test]
    fn test_lvm_names() {
        let pool = Pool::new("p1", "/dev/sdb");
        let blob = pool.blob("b1");
        assert_eq!(pool.thin_pool_lv_name(), "p1-thinpool");
        assert_eq!(blob.lv_name(), "p1-b1");
        assert_eq!(blob.lv_path("thinshare"), PathBuf::from("/dev/thinshare/p1-b1"));
        assert_eq!(blob.to_string(), "p1/b1");
    }

    #[test]
    fn test_export_id_display() {
        let id = ExportId::new(NodeName::from("node-a"), "b1");
        assert_eq!(id.to_string(), "node-a/b1");
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("volume id", "vol1").is_ok());
        let err = require_non_empty("volume id", "").unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: must specify volume id");
    }
}
