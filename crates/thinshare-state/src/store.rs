//! Typed optimistic-concurrency primitives over an [`ObjectBackend`].

use std::sync::Arc;
use std::time::Duration;

use thinshare_common::config::StoreConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{ObjectBackend, Versioned};
use crate::error::{StateError, StateResult};
use crate::memory::MemoryBackend;
use crate::record::Record;

/// Read-modify-write and condition-wait over versioned records
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn ObjectBackend>,
    max_update_retries: u32,
    retry_backoff: Duration,
    watch_timeout: Option<Duration>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            max_update_retries: config.max_update_retries.max(1),
            retry_backoff: config.retry_backoff(),
            watch_timeout: config.watch_timeout(),
        }
    }

    /// Store over a fresh [`MemoryBackend`] with default settings
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), &StoreConfig::default())
    }

    /// Read a record; absent records read as the zero value at version 0
    pub async fn get<R: Record>(&self, name: &str) -> StateResult<Versioned<R>> {
        self.get_key(&R::key(name)).await
    }

    /// Names of all stored records of kind `R`
    pub async fn list<R: Record>(&self) -> StateResult<Vec<String>> {
        let prefix = R::prefix();
        Ok(self
            .backend
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    /// Fetch, mutate and conditionally write back a record.
    ///
    /// On a version conflict the whole cycle is repeated, so `mutate` may
    /// run several times and must be a pure transform of the record. An
    /// error from `mutate` aborts the update without writing. If `mutate`
    /// leaves the record unchanged nothing is written.
    pub async fn atomic_update<R, F>(&self, name: &str, mut mutate: F) -> StateResult<Versioned<R>>
    where
        R: Record,
        F: FnMut(&mut R) -> thinshare_common::Result<()> + Send,
    {
        let key = R::key(name);

        for attempt in 1..=self.max_update_retries {
            let current: Versioned<R> = self.get_key(&key).await?;
            let mut value = current.value.clone();
            mutate(&mut value).map_err(StateError::Rejected)?;

            if value == current.value {
                return Ok(current);
            }

            let data = serde_json::to_vec(&value)?;
            match self
                .backend
                .compare_and_put(&key, current.version, data)
                .await
            {
                Ok(version) => return Ok(Versioned { version, value }),
                Err(StateError::Conflict { found, .. }) => {
                    debug!(%key, attempt, read = current.version, found, "update conflict, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(%key, attempts = self.max_update_retries, "giving up on contended record");
        Err(StateError::RetriesExhausted {
            key,
            attempts: self.max_update_retries,
        })
    }

    /// Wait until `predicate` holds for the record.
    ///
    /// Returns at once, without subscribing, if it already holds. Otherwise
    /// the key is subscribed before it is re-read, so no write landing
    /// between the check and the wait is missed. Ends with `Canceled` when
    /// `cancel` fires and `DeadlineExceeded` after the configured timeout.
    pub async fn watch_until<R, P>(
        &self,
        name: &str,
        cancel: &CancellationToken,
        mut predicate: P,
    ) -> StateResult<Versioned<R>>
    where
        R: Record,
        P: FnMut(&R) -> bool + Send,
    {
        let key = R::key(name);

        let current: Versioned<R> = self.get_key(&key).await?;
        if predicate(&current.value) {
            return Ok(current);
        }

        let wait = self.wait_for(&key, cancel, &mut predicate);
        match self.watch_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| StateError::DeadlineExceeded)?,
            None => wait.await,
        }
    }

    async fn wait_for<R, P>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        predicate: &mut P,
    ) -> StateResult<Versioned<R>>
    where
        R: Record,
        P: FnMut(&R) -> bool + Send,
    {
        let mut changes = self.backend.watch(key);
        loop {
            let current: Versioned<R> = self.get_key(key).await?;
            if predicate(&current.value) {
                return Ok(current);
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(StateError::Canceled),
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(StateError::Backend(format!("watch on {key} closed")));
                    }
                }
            }
        }
    }

    async fn get_key<R: Record>(&self, key: &str) -> StateResult<Versioned<R>> {
        match self.backend.get(key).await? {
            Some(stored) => Ok(Versioned {
                version: stored.version,
                value: serde_json::from_slice(&stored.value)?,
            }),
            None => Ok(Versioned {
                version: 0,
                value: R::default(),
            }),
        }
    }
}
