//! drift-control — the boundary to the hypervisor control plane.
//!
//! Everything the relocation core needs from the outside world goes
//! through the [`ControlPlane`] trait: starting and stopping migration
//! tasks, and the read queries the poll workers and the topology
//! reconciler issue.
//!
//! # Implementations
//!
//! - [`HttpControlPlane`]: JSON over HTTP/1.1 against the cluster gateway
//! - `testing::ScriptedControlPlane`: in-memory double with scripted
//!   replies (behind the `testing` feature)

pub mod error;
pub mod http;
pub mod port;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ControlError, ControlResult};
pub use http::HttpControlPlane;
pub use port::{
    ClusterLocations, ControlFuture, ControlPlane, StopOutcome, SubmittedMigration, TaskState,
    TaskStatus,
};
