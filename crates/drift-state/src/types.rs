//! Persisted record types.

use serde::{Deserialize, Serialize};

use drift_core::{GuestId, GuestRef, MigrationRequest, NodeName, TaskHandle, epoch_secs};

/// Final status of a recorded migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Failed,
    Cancelled,
    /// Tracking timed out; outcome unknown.
    Timeout,
    DryRun,
    Skipped,
}

/// Who started a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Automated,
    Manual,
}

/// One entry of the migration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    /// Unix epoch seconds.
    pub timestamp: u64,
    pub guest: GuestRef,
    #[serde(default)]
    pub name: Option<String>,
    pub source_node: NodeName,
    pub target_node: NodeName,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    pub status: RecordStatus,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub initiated_by: Initiator,
    #[serde(default)]
    pub dry_run: bool,
    /// Schedule window that permitted the run.
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub task: Option<TaskHandle>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MigrationRecord {
    pub fn new(request: &MigrationRequest, status: RecordStatus, initiated_by: Initiator) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: epoch_secs(),
            guest: request.guest,
            name: request.name.clone(),
            source_node: request.source_node.clone(),
            target_node: request.target_node.clone(),
            reason: request.reason.clone(),
            score: request.score,
            status,
            duration_secs: None,
            initiated_by,
            dry_run: status == RecordStatus::DryRun,
            window: None,
            task: None,
            error: None,
        }
    }

    /// Composite key `{epoch:020}:{uuid}`; sorts chronologically.
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.id)
    }
}

/// One line of the automation activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: u64,
    #[serde(default)]
    pub guest: Option<GuestId>,
    #[serde(default)]
    pub name: Option<String>,
    /// `skipped`, `migrated`, `failed`, ...
    pub action: String,
    pub reason: String,
}

impl ActivityEntry {
    pub fn new(guest: Option<GuestId>, name: Option<String>, action: &str, reason: &str) -> Self {
        Self {
            timestamp: epoch_secs(),
            guest,
            name,
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// State the automation runner keeps between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationState {
    #[serde(default)]
    pub last_run: Option<u64>,
    /// Window that permitted the last run.
    #[serde(default)]
    pub current_window: Option<String>,
    #[serde(default)]
    pub last_outcome: Option<String>,
    /// Newest entries last.
    #[serde(default)]
    pub activity_log: Vec<ActivityEntry>,
}

impl AutomationState {
    /// Activity entries retained.
    pub const ACTIVITY_LIMIT: usize = 50;

    pub fn push_activity(&mut self, entry: ActivityEntry) {
        self.activity_log.push(entry);
        let excess = self
            .activity_log
            .len()
            .saturating_sub(Self::ACTIVITY_LIMIT);
        if excess > 0 {
            self.activity_log.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_sorts_by_time() {
        let request = MigrationRequest::new(GuestRef::vm(1), "a", "b");
        let mut early = MigrationRecord::new(&request, RecordStatus::Completed, Initiator::Manual);
        early.timestamp = 99;
        let mut late = early.clone();
        late.timestamp = 1_000;
        assert!(early.table_key() < late.table_key());
        assert!(early.table_key().starts_with("00000000000000000099:"));
    }

    #[test]
    fn dry_run_flag_follows_status() {
        let request = MigrationRequest::new(GuestRef::vm(1), "a", "b");
        let record = MigrationRecord::new(&request, RecordStatus::DryRun, Initiator::Automated);
        assert!(record.dry_run);
        assert_eq!(record.id.len(), 36);
    }

    #[test]
    fn activity_log_keeps_newest() {
        let mut state = AutomationState::default();
        for i in 0..60 {
            state.push_activity(ActivityEntry::new(Some(i), None, "skipped", "cooldown"));
        }
        assert_eq!(state.activity_log.len(), AutomationState::ACTIVITY_LIMIT);
        assert_eq!(state.activity_log[0].guest, Some(10));
        assert_eq!(state.activity_log[49].guest, Some(59));
    }
}
