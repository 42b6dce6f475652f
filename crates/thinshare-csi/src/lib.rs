//! thinshare CSI
//!
//! Node-side staging for CSI. Staging a volume never touches devices
//! directly: the node records that it wants the volume and waits for the
//! reconcile loop to report it attached.
//!
//! ```text
//! NodeStageVolume ──► AttachmentController ──► desired_nodes += node
//!                              │
//!                              └─ wait until node ∈ observed_nodes
//! ```

pub mod controller;
pub mod node;

pub use controller::AttachmentController;
pub use node::{CsiNode, NodeService, NodeStageVolumeRequest, NodeUnstageVolumeRequest};
