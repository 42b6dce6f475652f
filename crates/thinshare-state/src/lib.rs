//! thinshare State - versioned cluster records
//!
//! Every piece of shared state (pool activation, blob holders, per-volume
//! attachment intent) lives in a versioned object store. Writers use
//! optimistic concurrency: read a record and its version, mutate it in
//! memory, write it back conditioned on the version, retry on conflict.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  StateStore                  │  atomic_update / watch_until
//! │  - typed Record codec (JSON) │
//! │  - bounded conflict retries  │
//! └──────────────┬───────────────┘
//!                │ ObjectBackend (get / compare_and_put / watch)
//!       ┌────────┴────────┐
//! ┌─────▼───────┐  ┌──────▼──────┐
//! │MemoryBackend│  │ RedbBackend │
//! └─────────────┘  └─────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod persistent;
pub mod record;
pub mod store;

pub use backend::{Notifier, ObjectBackend, Versioned};
pub use error::{StateError, StateResult};
pub use memory::MemoryBackend;
pub use persistent::RedbBackend;
pub use record::{BlobBinding, Holder, PoolState, Record, VolumeAttachment};
pub use store::StateStore;
