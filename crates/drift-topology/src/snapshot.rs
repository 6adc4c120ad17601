//! Cluster topology snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use drift_control::ClusterLocations;
use drift_core::{GuestId, NodeName};

use crate::error::{TopologyError, TopologyResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub guest_ids: BTreeSet<GuestId>,
}

/// Progress indicator for a guest with a migration in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlight {
    pub target_node: NodeName,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestEntry {
    pub current_node: NodeName,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlight>,
}

/// Node → guests and guest → node indexes, kept in agreement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub nodes: BTreeMap<NodeName, NodeEntry>,
    pub guests: BTreeMap<GuestId, GuestEntry>,
}

impl ClusterTopology {
    /// Build a snapshot from the bulk location query.
    ///
    /// Placement comes from the guest map; node names listed without
    /// guests are kept as empty nodes.
    pub fn from_locations(locations: &ClusterLocations) -> Self {
        let mut topology = ClusterTopology::default();
        for node in locations.nodes.keys() {
            topology.nodes.entry(node.clone()).or_default();
        }
        for (id, location) in &locations.guests {
            topology.place(*id, &location.node, &location.status);
        }
        topology
    }

    pub fn node_of(&self, guest: GuestId) -> Option<&str> {
        self.guests.get(&guest).map(|g| g.current_node.as_str())
    }

    /// Move `guest` onto `target` in one step, clearing its in-flight
    /// indicator. Unknown guests are added. Returns the previous node.
    pub fn move_guest(&mut self, guest: GuestId, target: &str, status: &str) -> Option<NodeName> {
        let previous = self.guests.get(&guest).map(|g| g.current_node.clone());
        if let Some(prev) = &previous {
            if let Some(node) = self.nodes.get_mut(prev) {
                node.guest_ids.remove(&guest);
            }
        }
        self.place(guest, target, status);
        previous
    }

    pub fn set_in_flight(
        &mut self,
        guest: GuestId,
        in_flight: Option<InFlight>,
    ) -> TopologyResult<()> {
        let entry = self
            .guests
            .get_mut(&guest)
            .ok_or(TopologyError::UnknownGuest(guest))?;
        entry.in_flight = in_flight;
        Ok(())
    }

    /// Verify that every guest appears in exactly one node's set, the one
    /// named by its `current_node`.
    pub fn check_consistency(&self) -> TopologyResult<()> {
        for (id, guest) in &self.guests {
            let hosted = self
                .nodes
                .get(&guest.current_node)
                .is_some_and(|n| n.guest_ids.contains(id));
            if !hosted {
                return Err(TopologyError::Inconsistent(format!(
                    "guest {id} claims node {} but is not listed there",
                    guest.current_node
                )));
            }
        }
        for (name, node) in &self.nodes {
            for id in &node.guest_ids {
                match self.guests.get(id) {
                    None => {
                        return Err(TopologyError::Inconsistent(format!(
                            "node {name} lists unknown guest {id}"
                        )));
                    }
                    Some(guest) if guest.current_node != *name => {
                        return Err(TopologyError::Inconsistent(format!(
                            "guest {id} listed on {name} but runs on {}",
                            guest.current_node
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn place(&mut self, guest: GuestId, node: &str, status: &str) {
        self.nodes
            .entry(node.to_string())
            .or_default()
            .guest_ids
            .insert(guest);
        self.guests.insert(
            guest,
            GuestEntry {
                current_node: node.to_string(),
                status: status.to_string(),
                in_flight: None,
            },
        );
    }
}

/// Topology shared between the reconciler and readers.
///
/// Every mutation runs under one write lock, so readers never observe a
/// half-applied move.
#[derive(Debug, Clone, Default)]
pub struct SharedTopology {
    inner: Arc<RwLock<ClusterTopology>>,
}

impl SharedTopology {
    pub fn new(topology: ClusterTopology) -> Self {
        Self {
            inner: Arc::new(RwLock::new(topology)),
        }
    }

    pub async fn snapshot(&self) -> ClusterTopology {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, topology: ClusterTopology) {
        *self.inner.write().await = topology;
    }

    /// Run `f` with exclusive access.
    pub async fn update<R>(&self, f: impl FnOnce(&mut ClusterTopology) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}
