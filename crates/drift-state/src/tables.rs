//! redb table definitions for the Drift state store.

use redb::TableDefinition;

/// Every table maps string keys to JSON-encoded values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Singleton settings keyed by name (`schedule`).
pub const SETTINGS: JsonTable = TableDefinition::new("settings");

/// Migration records keyed by `{epoch:020}:{uuid}`.
pub const HISTORY: JsonTable = TableDefinition::new("history");

/// Automation runner state keyed by name (`automation`).
pub const RUN_STATE: JsonTable = TableDefinition::new("run_state");

pub const SCHEDULE_KEY: &str = "schedule";
pub const AUTOMATION_KEY: &str = "automation";
