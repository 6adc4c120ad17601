//! drift-topology — the local view of which guest runs on which node.
//!
//! [`ClusterTopology`] is a plain snapshot with a referential invariant:
//! every guest id sits in exactly one node's set, and that node matches
//! the guest's own `current_node`. [`SharedTopology`] serialises all
//! mutation behind one lock so a relocation is a single state transition.
//! [`TopologyReconciler`] folds tracker events into the snapshot and
//! verifies it against the control plane afterwards.

pub mod error;
pub mod reconciler;
pub mod snapshot;

pub use error::{TopologyError, TopologyResult};
pub use reconciler::TopologyReconciler;
pub use snapshot::{ClusterTopology, GuestEntry, InFlight, NodeEntry, SharedTopology};
