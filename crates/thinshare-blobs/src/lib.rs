//! thinshare Blobs
//!
//! Blobs are LVM thin LVs inside pools that live on one shared block
//! device. LVM lets a thin pool be active on only one node at a time, so
//! every other node reaches a blob through an NBD export served by the
//! active node, with dm-multipath on top so the path can be swapped when
//! the pool moves.
//!
//! # Architecture
//!
//! ```text
//!        holder node                      active node
//! ┌──────────────────────┐        ┌──────────────────────────┐
//! │ dm-multipath device  │        │ dm-multipath device      │
//! │          │           │        │          │               │
//! │   NBD client ────────┼──NBD──►│ NBD server ─► thin LV    │
//! └──────────────────────┘        │                 │        │
//!                                 │          thin pool LV    │
//!                                 └─────────────────┬────────┘
//!                                            shared device
//! ```
//!
//! [`BlobManager`] owns the activation state machine: attaching and
//! detaching holders and migrating a pool between nodes. The physical
//! steps go through the [`VolumeActivator`], [`ExportManager`] and
//! [`PathManager`] capabilities.

pub mod command;
pub mod manager;
pub mod migrate;
pub mod ops;
pub mod reconcile;
pub mod scripts;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{NodeCommand, ShellCommand};
pub use manager::BlobManager;
pub use ops::{ExportManager, PathManager, VolumeActivator};
pub use reconcile::VolumeReconciler;
pub use scripts::{LvmScript, MultipathScript, NbdScript};
