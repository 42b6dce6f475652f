//! Configuration types for thinshare
//!
//! This module defines configuration structures used across components.
//! Every section has a `Default` so partial TOML files deserialize.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a thinshare node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node identity
    pub node: NodeConfig,
    /// Versioned state store
    pub store: StoreConfig,
    /// LVM layout
    pub lvm: LvmConfig,
    /// Helper scripts for physical operations
    pub scripts: ScriptConfig,
    /// Reconcile loop
    pub reconcile: ReconcileConfig,
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of the local node, as used in attachment records
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "thinshare-node".to_string(),
        }
    }
}

/// State store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the redb state database
    pub path: PathBuf,
    /// Attempts of the fetch-mutate-write cycle before giving up
    pub max_update_retries: u32,
    /// Backoff between conflicting attempts (milliseconds, multiplied by attempt)
    pub retry_backoff_ms: u64,
    /// Upper bound on condition waits (seconds, 0 = wait until canceled)
    pub watch_timeout_secs: u64,
}

impl StoreConfig {
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[must_use]
    pub const fn watch_timeout(&self) -> Option<Duration> {
        if self.watch_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.watch_timeout_secs))
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/thinshare/state.db"),
            max_update_retries: 16,
            retry_backoff_ms: 10,
            watch_timeout_secs: 0,
        }
    }
}

/// LVM layout configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LvmConfig {
    /// Shared volume group holding every pool
    pub vg_name: String,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            vg_name: "thinshare".to_string(),
        }
    }
}

/// Helper script locations
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// LVM activation script (lockstart / activate-pool / deactivate-pool / activate / deactivate)
    pub lvm: PathBuf,
    /// NBD export script (start-server / stop-server / connect-client / disconnect-client)
    pub nbd: PathBuf,
    /// dm-multipath script (connect / disconnect)
    pub multipath: PathBuf,
    /// Command prefix used to reach other nodes
    pub remote_shell: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            lvm: PathBuf::from("/usr/libexec/thinshare/lvm.sh"),
            nbd: PathBuf::from("/usr/libexec/thinshare/nbd.sh"),
            multipath: PathBuf::from("/usr/libexec/thinshare/dm-multipath.sh"),
            remote_shell: vec!["ssh".to_string()],
        }
    }
}

/// Reconcile loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Pause between reconcile passes (milliseconds)
    pub interval_ms: u64,
}

impl ReconcileConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node.name, "thinshare-node");
        assert_eq!(config.store.max_update_retries, 16);
        assert_eq!(config.store.watch_timeout(), None);
        assert_eq!(config.lvm.vg_name, "thinshare");
        assert_eq!(config.scripts.remote_shell, vec!["ssh".to_string()]);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [node]
            name = "node-b"

            [store]
            watch_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.node.name, "node-b");
        assert_eq!(config.store.watch_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.store.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.reconcile.interval(), Duration::from_secs(1));
    }
}
