//! StateStore — redb-backed persistence for Drift.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use drift_core::{GuestId, ScheduleConfig};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(RUN_STATE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(
        &self,
        table: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ── Schedule ───────────────────────────────────────────────────

    /// The persisted schedule, or the empty (permit-all) schedule.
    pub fn read_schedule(&self) -> StateResult<ScheduleConfig> {
        Ok(self
            .get_json(SETTINGS, SCHEDULE_KEY)?
            .unwrap_or_default())
    }

    pub fn has_schedule(&self) -> StateResult<bool> {
        Ok(self
            .get_json::<ScheduleConfig>(SETTINGS, SCHEDULE_KEY)?
            .is_some())
    }

    /// Validate and persist a schedule.
    pub fn write_schedule(&self, schedule: &ScheduleConfig) -> StateResult<()> {
        schedule
            .validate()
            .map_err(|e| StateError::Invalid(e.to_string()))?;
        self.put_json(SETTINGS, SCHEDULE_KEY, schedule)?;
        debug!(windows = schedule.windows.len(), "schedule stored");
        Ok(())
    }

    // ── History ────────────────────────────────────────────────────

    pub fn append_history(&self, record: &MigrationRecord) -> StateResult<()> {
        let key = record.table_key();
        self.put_json(HISTORY, &key, record)?;
        debug!(%key, guest = record.guest.id, status = ?record.status, "migration recorded");
        Ok(())
    }

    /// Up to `limit` records, newest first.
    pub fn recent_history(&self, limit: usize) -> StateResult<Vec<MigrationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: MigrationRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Most recent real (non dry-run) completed migration of `guest`.
    pub fn last_migration_for(&self, guest: GuestId) -> StateResult<Option<MigrationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: MigrationRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.guest.id == guest && record.status == RecordStatus::Completed && !record.dry_run
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Number of stored history records.
    pub fn history_len(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    // ── Automation ─────────────────────────────────────────────────

    pub fn read_automation_state(&self) -> StateResult<AutomationState> {
        Ok(self
            .get_json(RUN_STATE, AUTOMATION_KEY)?
            .unwrap_or_default())
    }

    pub fn write_automation_state(&self, state: &AutomationState) -> StateResult<()> {
        self.put_json(RUN_STATE, AUTOMATION_KEY, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use drift_core::{DayOfWeek, GuestRef, MigrationRequest, TimeWindow, WindowMode};

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn record(guest: GuestId, timestamp: u64, status: RecordStatus) -> MigrationRecord {
        let request = MigrationRequest::new(GuestRef::vm(guest), "node-a", "node-b");
        let mut record = MigrationRecord::new(&request, status, Initiator::Automated);
        record.timestamp = timestamp;
        record
    }

    #[test]
    fn test_schedule_defaults_to_empty() {
        let store = store();
        assert!(!store.has_schedule().unwrap());
        assert!(store.read_schedule().unwrap().windows.is_empty());
    }

    #[test]
    fn test_schedule_roundtrip() {
        let store = store();
        let schedule = ScheduleConfig::new(vec![TimeWindow::new(
            "nightly",
            WindowMode::Allow,
            [DayOfWeek::Saturday, DayOfWeek::Sunday],
            "22:00".parse().unwrap(),
            "06:00".parse().unwrap(),
        )]);
        store.write_schedule(&schedule).unwrap();
        assert!(store.has_schedule().unwrap());
        assert_eq!(store.read_schedule().unwrap(), schedule);
    }

    #[test]
    fn test_write_schedule_validates() {
        let store = store();
        let t = "10:00".parse().unwrap();
        let schedule = ScheduleConfig::new(vec![TimeWindow::new(
            "broken",
            WindowMode::Deny,
            [DayOfWeek::Monday],
            t,
            t,
        )]);
        assert!(matches!(
            store.write_schedule(&schedule),
            Err(StateError::Invalid(_))
        ));
        assert!(!store.has_schedule().unwrap());
    }

    #[test]
    fn test_history_newest_first() {
        let store = store();
        store.append_history(&record(1, 100, RecordStatus::Completed)).unwrap();
        store.append_history(&record(2, 300, RecordStatus::Failed)).unwrap();
        store.append_history(&record(3, 200, RecordStatus::Completed)).unwrap();

        let recent = store.recent_history(2).unwrap();
        let guests: Vec<u32> = recent.iter().map(|r| r.guest.id).collect();
        assert_eq!(guests, vec![2, 3]);
        assert_eq!(store.history_len().unwrap(), 3);
    }

    #[test]
    fn test_last_migration_ignores_failures_and_dry_runs() {
        let store = store();
        store.append_history(&record(7, 100, RecordStatus::Completed)).unwrap();
        store.append_history(&record(7, 200, RecordStatus::Failed)).unwrap();
        store.append_history(&record(7, 300, RecordStatus::DryRun)).unwrap();
        store.append_history(&record(8, 400, RecordStatus::Completed)).unwrap();

        let last = store.last_migration_for(7).unwrap().unwrap();
        assert_eq!(last.timestamp, 100);
        assert!(store.last_migration_for(9).unwrap().is_none());
    }

    #[test]
    fn test_automation_state_roundtrip() {
        let store = store();
        assert_eq!(store.read_automation_state().unwrap(), AutomationState::default());

        let mut state = AutomationState {
            last_run: Some(42),
            current_window: Some("nightly".to_string()),
            ..Default::default()
        };
        state.push_activity(ActivityEntry::new(Some(101), None, "skipped", "cooldown"));
        store.write_automation_state(&state).unwrap();
        assert_eq!(store.read_automation_state().unwrap(), state);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.append_history(&record(1, 100, RecordStatus::Completed)).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.recent_history(10).unwrap().len(), 1);
    }
}
