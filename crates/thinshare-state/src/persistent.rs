//! Persistent object backend using Redb
//!
//! Keeps record bytes and their version tokens in two tables of one redb
//! database. The compare-and-put runs in a single write transaction, and
//! redb serializes write transactions, so concurrent writers sharing a
//! handle observe a linearizable history.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tokio::sync::watch;
use tracing::debug;

use crate::backend::{Notifier, ObjectBackend, Versioned};
use crate::error::{StateError, StateResult};

// ── Table definitions ─────────────────────────────────────────────────────────

/// Objects: key (str) → JSON bytes
const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
/// Versions: key (str) → version token
const VERSIONS: TableDefinition<&str, u64> = TableDefinition::new("versions");

// ── RedbBackend ───────────────────────────────────────────────────────────────

/// Persistent object backend backed by Redb.
pub struct RedbBackend {
    db: Database,
    notifier: Notifier,
}

impl RedbBackend {
    /// Open (or create) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(OBJECTS)?;
            let _t = write_txn.open_table(VERSIONS)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            notifier: Notifier::new(),
        })
    }
}

#[async_trait]
impl ObjectBackend for RedbBackend {
    async fn get(&self, key: &str) -> StateResult<Option<Versioned<Vec<u8>>>> {
        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;
        let Some(version) = versions.get(key)?.map(|v| v.value()) else {
            return Ok(None);
        };
        let objects = read_txn.open_table(OBJECTS)?;
        let value = objects
            .get(key)?
            .map(|v| v.value().to_vec())
            .ok_or_else(|| StateError::Backend(format!("{key} has a version but no data")))?;
        Ok(Some(Versioned { version, value }))
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected_version: u64,
        data: Vec<u8>,
    ) -> StateResult<u64> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut versions = write_txn.open_table(VERSIONS)?;
            let current = versions.get(key)?.map_or(0, |v| v.value());
            if current == expected_version {
                let next = current + 1;
                versions.insert(key, next)?;
                let mut objects = write_txn.open_table(OBJECTS)?;
                objects.insert(key, data.as_slice())?;
                Ok(next)
            } else {
                Err(current)
            }
        };

        match outcome {
            Ok(version) => {
                write_txn.commit()?;
                debug!(key, version, "committed record");
                self.notifier.publish(key, version);
                Ok(version)
            }
            Err(found) => {
                write_txn.abort()?;
                Err(StateError::Conflict {
                    key: key.to_string(),
                    expected: expected_version,
                    found,
                })
            }
        }
    }

    async fn list(&self, prefix: &str) -> StateResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;
        let mut keys = Vec::new();
        for entry in versions.range(prefix..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    fn watch(&self, key: &str) -> watch::Receiver<u64> {
        self.notifier.subscribe(key)
    }
}
