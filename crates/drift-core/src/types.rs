//! Shared types used across Drift crates.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Cluster-wide numeric guest identifier.
pub type GuestId = u32;

/// Name of a hypervisor host in the cluster.
pub type NodeName = String;

// ── Guests ────────────────────────────────────────────────────────

/// Kind of guest workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestKind {
    /// Full virtual machine (live migration).
    Vm,
    /// Container (migrated with a restart).
    Container,
}

impl GuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Vm => "vm",
            GuestKind::Container => "container",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuestKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vm" | "qemu" => Ok(GuestKind::Vm),
            "container" | "ct" | "lxc" => Ok(GuestKind::Container),
            other => Err(ConfigError::InvalidGuestKind(other.to_string())),
        }
    }
}

/// A guest identified by id and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestRef {
    pub id: GuestId,
    pub kind: GuestKind,
}

impl GuestRef {
    pub fn vm(id: GuestId) -> Self {
        Self {
            id,
            kind: GuestKind::Vm,
        }
    }

    pub fn container(id: GuestId) -> Self {
        Self {
            id,
            kind: GuestKind::Container,
        }
    }
}

impl fmt::Display for GuestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

// ── Tasks ─────────────────────────────────────────────────────────

/// Opaque handle of a task running on the external control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transfer progress reported by a running migration task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_copied: u64,
    pub bytes_total: u64,
    /// Completion percentage (0-100).
    pub percent: f64,
    /// Transfer rate in bytes per second.
    pub throughput: f64,
}

impl Progress {
    /// Build a progress record, deriving the percentage from byte counts.
    pub fn from_bytes(bytes_copied: u64, bytes_total: u64, throughput: f64) -> Self {
        let percent = if bytes_total == 0 {
            0.0
        } else {
            (bytes_copied as f64 / bytes_total as f64 * 100.0).min(100.0)
        };
        Self {
            bytes_copied,
            bytes_total,
            percent,
            throughput,
        }
    }
}

/// Where a guest currently runs, as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestLocation {
    pub node: NodeName,
    /// Guest run status (`running`, `stopped`, ...).
    pub status: String,
}

// ── Requests ──────────────────────────────────────────────────────

/// A request to relocate one guest from `source_node` to `target_node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub guest: GuestRef,
    pub source_node: NodeName,
    pub target_node: NodeName,
    /// Display name of the guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Why this relocation was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Externally computed suitability score. Opaque to this crate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl MigrationRequest {
    pub fn new(guest: GuestRef, source_node: &str, target_node: &str) -> Self {
        Self {
            guest,
            source_node: source_node.to_string(),
            target_node: target_node.to_string(),
            name: None,
            reason: None,
            score: None,
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_kind_parses_aliases() {
        assert_eq!("qemu".parse::<GuestKind>().unwrap(), GuestKind::Vm);
        assert_eq!("LXC".parse::<GuestKind>().unwrap(), GuestKind::Container);
        assert!("bhyve".parse::<GuestKind>().is_err());
    }

    #[test]
    fn guest_ref_display() {
        assert_eq!(GuestRef::vm(101).to_string(), "vm/101");
        assert_eq!(GuestRef::container(7).to_string(), "container/7");
    }

    #[test]
    fn progress_percent_from_bytes() {
        let p = Progress::from_bytes(512, 2048, 100.0);
        assert_eq!(p.percent, 25.0);
        assert_eq!(Progress::from_bytes(10, 0, 0.0).percent, 0.0);
    }

    #[test]
    fn request_omits_empty_optionals() {
        let req = MigrationRequest::new(GuestRef::vm(101), "node-a", "node-b");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["guest"]["kind"], "vm");
        assert!(json.get("score").is_none());
    }
}
