//! Batch results.

use serde::{Deserialize, Serialize};

use drift_core::MigrationRequest;
use drift_tracker::{MigrationOperation, OperationState};

/// Reason recorded for requests left unsubmitted after an abort.
pub const ABORTED_REASON: &str = "batch aborted after failure";

/// How one batch entry ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded,
    Cancelled,
    Failed { error: String },
    /// Tracking timed out; the migration may or may not have finished.
    TimedOut,
    SubmissionFailed { error: String },
    Skipped { reason: String },
    DryRun,
}

impl BatchOutcome {
    /// Outcome for a terminal operation.
    pub fn from_operation(operation: &MigrationOperation) -> Self {
        match operation.state {
            OperationState::Succeeded => BatchOutcome::Succeeded,
            OperationState::Cancelled => BatchOutcome::Cancelled,
            OperationState::TimedOut => BatchOutcome::TimedOut,
            OperationState::Failed | OperationState::Pending | OperationState::Running => {
                BatchOutcome::Failed {
                    error: operation
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "migration failed".to_string()),
                }
            }
        }
    }

    /// Whether this outcome counts toward abort-on-failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BatchOutcome::Failed { .. } | BatchOutcome::SubmissionFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub request: MigrationRequest,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
    /// Final state of the tracked operation, when one was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<MigrationOperation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Timed out with unknown outcome.
    pub unresolved: usize,
    pub skipped: usize,
    pub dry_run: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub aborted: bool,
    pub counts: BatchCounts,
    pub started_at: u64,
    pub finished_at: u64,
}

impl BatchReport {
    pub(crate) fn finish(entries: Vec<BatchEntry>, aborted: bool, started_at: u64) -> Self {
        let mut counts = BatchCounts::default();
        for entry in &entries {
            match entry.outcome {
                BatchOutcome::Succeeded => counts.succeeded += 1,
                BatchOutcome::Failed { .. } | BatchOutcome::SubmissionFailed { .. } => {
                    counts.failed += 1
                }
                BatchOutcome::Cancelled => counts.cancelled += 1,
                BatchOutcome::TimedOut => counts.unresolved += 1,
                BatchOutcome::Skipped { .. } => counts.skipped += 1,
                BatchOutcome::DryRun => counts.dry_run += 1,
            }
        }
        Self {
            entries,
            aborted,
            counts,
            started_at,
            finished_at: drift_core::epoch_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::GuestRef;

    #[test]
    fn entry_serializes_flat() {
        let entry = BatchEntry {
            request: MigrationRequest::new(GuestRef::vm(1), "a", "b"),
            outcome: BatchOutcome::Skipped {
                reason: ABORTED_REASON.to_string(),
            },
            operation: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], ABORTED_REASON);
    }

    #[test]
    fn counts() {
        let entry = |outcome| BatchEntry {
            request: MigrationRequest::new(GuestRef::vm(1), "a", "b"),
            outcome,
            operation: None,
        };
        let report = BatchReport::finish(
            vec![
                entry(BatchOutcome::Succeeded),
                entry(BatchOutcome::TimedOut),
                entry(BatchOutcome::SubmissionFailed {
                    error: "x".to_string(),
                }),
                entry(BatchOutcome::DryRun),
            ],
            true,
            0,
        );
        assert_eq!(
            report.counts,
            BatchCounts {
                succeeded: 1,
                failed: 1,
                cancelled: 0,
                unresolved: 1,
                skipped: 0,
                dry_run: 1,
            }
        );
    }
}
