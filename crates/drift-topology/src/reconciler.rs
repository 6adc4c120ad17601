//! Applies tracker outcomes to the shared topology.
//!
//! A `completed` event moves the guest to its target node in one locked
//! update, then the snapshot is re-read from the control plane so any
//! stale cached placement is corrected. `cancelled` and `failed` only
//! clear the in-flight indicator. A `timed_out` operation has an unknown
//! outcome, so it is resolved by a resync alone.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use drift_control::{ControlPlane, ControlResult};
use drift_core::GuestId;
use drift_tracker::TrackerEvent;

use crate::snapshot::{ClusterTopology, InFlight, SharedTopology};

pub struct TopologyReconciler {
    topology: SharedTopology,
    control: Arc<dyn ControlPlane>,
}

impl TopologyReconciler {
    pub fn new(topology: SharedTopology, control: Arc<dyn ControlPlane>) -> Self {
        Self { topology, control }
    }

    pub fn topology(&self) -> &SharedTopology {
        &self.topology
    }

    /// Fold one event into the snapshot. Returns whether a resync should
    /// follow.
    pub async fn apply(&self, event: &TrackerEvent) -> bool {
        let op = event.operation();
        let guest = op.guest.id;

        match event {
            TrackerEvent::Started { .. } | TrackerEvent::ProgressUpdated { .. } => {
                let in_flight = InFlight {
                    target_node: op.target_node.clone(),
                    percent: op.progress.as_ref().map(|p| p.percent).unwrap_or(0.0),
                };
                let result = self
                    .topology
                    .update(|t| t.set_in_flight(guest, Some(in_flight)))
                    .await;
                if let Err(e) = result {
                    debug!(guest, error = %e, "no topology entry for in-flight guest");
                }
                false
            }
            TrackerEvent::Completed { location, .. } => {
                let previous = self
                    .topology
                    .update(|t| t.move_guest(guest, &op.target_node, &location.status))
                    .await;
                info!(
                    guest,
                    from = previous.as_deref().unwrap_or("unknown"),
                    to = %op.target_node,
                    "topology updated after migration"
                );
                true
            }
            TrackerEvent::Cancelled { .. } | TrackerEvent::Failed { .. } => {
                self.clear_in_flight(guest).await;
                false
            }
            TrackerEvent::TimedOut { .. } => {
                self.clear_in_flight(guest).await;
                true
            }
        }
    }

    /// Apply an event and run the follow-up resync if it calls for one.
    pub async fn handle(&self, event: &TrackerEvent) {
        if self.apply(event).await {
            if let Err(e) = self.resync().await {
                warn!(guest = event.guest_id(), error = %e, "topology resync failed, keeping local snapshot");
            }
        }
    }

    /// Replace the snapshot with the control plane's bulk placement.
    ///
    /// In-flight indicators of guests still present are carried over. On
    /// error the current snapshot is left untouched.
    pub async fn resync(&self) -> ControlResult<()> {
        let locations = self.control.query_all_guest_locations().await?;
        let mut fresh = ClusterTopology::from_locations(&locations);

        self.topology
            .update(|current| {
                for (id, entry) in &current.guests {
                    if let (Some(in_flight), Some(target)) =
                        (&entry.in_flight, fresh.guests.get_mut(id))
                    {
                        target.in_flight = Some(in_flight.clone());
                    }
                }
                *current = fresh;
            })
            .await;
        debug!(guests = locations.guests.len(), nodes = locations.nodes.len(), "topology resynced");
        Ok(())
    }

    /// Consume tracker events until shutdown or until the tracker goes away.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<TrackerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("topology reconciler started");
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.handle(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "reconciler lagged behind tracker events, resyncing");
                        if let Err(e) = self.resync().await {
                            warn!(error = %e, "topology resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("topology reconciler stopped");
    }

    async fn clear_in_flight(&self, guest: GuestId) {
        let _ = self.topology.update(|t| t.set_in_flight(guest, None)).await;
    }
}
