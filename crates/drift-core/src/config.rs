//! drift.toml configuration parser.
//!
//! Every section is optional; missing values fall back to the defaults
//! the daemon was tuned with (3s poll interval, 5m tracking timeout, 5s
//! display grace period).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schedule::ScheduleConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Directory holding the persistent state database.
    pub data_dir: PathBuf,
    pub api: ApiConfig,
    pub control: ControlConfig,
    pub tracker: TrackerConfig,
    pub batch: BatchConfig,
    pub automation: AutomationConfig,
    /// Seed schedule, written to the store when none is persisted yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/drift"),
            api: ApiConfig::default(),
            control: ControlConfig::default(),
            tracker: TrackerConfig::default(),
            batch: BatchConfig::default(),
            automation: AutomationConfig::default(),
            schedule: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8450".to_string(),
        }
    }
}

/// Connection settings for the cluster gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Gateway address (`host:port`).
    pub endpoint: String,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Operation tracker tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Time between poll ticks of one operation.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Wall-clock limit after which local tracking gives up.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// How long a terminal operation stays visible before archival.
    #[serde(with = "duration_str")]
    pub grace_period: Duration,
    /// Maximum number of archived terminal operations kept in memory.
    pub history_limit: usize,
    /// Extra location lookups attempted before declaring an exit failed.
    pub location_retries: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5 * 60),
            grace_period: Duration::from_secs(5),
            history_limit: 50,
            location_retries: 0,
        }
    }
}

/// Sequential batch execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Stop submitting after the first failed migration.
    pub abort_on_failure: bool,
    /// Report what would run without submitting anything.
    pub dry_run: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            abort_on_failure: true,
            dry_run: false,
        }
    }
}

/// Automated relocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub enabled: bool,
    pub dry_run: bool,
    /// Time between automated runs.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Nodes being drained; their guests bypass cooldown and tag rules.
    pub maintenance_nodes: Vec<String>,
    pub rules: AutomationRules,
    pub notifications: NotificationConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            interval: Duration::from_secs(60 * 60),
            maintenance_nodes: Vec::new(),
            rules: AutomationRules::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// Filters applied to recommendations before they are executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationRules {
    pub min_confidence_score: f64,
    /// Minimum time between two relocations of the same guest.
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
    pub max_migrations_per_run: usize,
    /// Upper bound on migrations in flight; a run only fills free slots.
    pub max_concurrent_migrations: usize,
    pub respect_ignore_tags: bool,
    pub require_auto_migrate_ok_tag: bool,
    /// Keep guests sharing an `exclude_*` tag off the same node.
    pub respect_exclude_affinity: bool,
}

impl Default for AutomationRules {
    fn default() -> Self {
        Self {
            min_confidence_score: 75.0,
            cooldown: Duration::from_secs(60 * 60),
            max_migrations_per_run: 3,
            max_concurrent_migrations: 3,
            respect_ignore_tags: true,
            require_auto_migrate_ok_tag: false,
            respect_exclude_affinity: true,
        }
    }
}

/// Webhook notified when an automated run starts, completes or fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// `http://host[:port]/path`
    pub webhook_url: Option<String>,
    pub on_start: bool,
    pub on_complete: bool,
    pub on_failure: bool,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            on_start: false,
            on_complete: false,
            on_failure: false,
            timeout: Duration::from_secs(10),
        }
    }
}

impl DriftConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: DriftConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb database inside `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("drift.redb")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracker.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tracker.poll_interval must be positive".to_string(),
            ));
        }
        if self.tracker.timeout < self.tracker.poll_interval {
            return Err(ConfigError::Invalid(
                "tracker.timeout must be at least one poll interval".to_string(),
            ));
        }
        if self.automation.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "automation.interval must be positive".to_string(),
            ));
        }
        if self.automation.rules.max_concurrent_migrations == 0 {
            return Err(ConfigError::Invalid(
                "automation.rules.max_concurrent_migrations must be positive".to_string(),
            ));
        }
        let notifications = &self.automation.notifications;
        if let Some(url) = &notifications.webhook_url {
            if !url.starts_with("http://") {
                return Err(ConfigError::Invalid(format!(
                    "automation.notifications.webhook_url must be an http:// URL, got '{url}'"
                )));
            }
        } else if notifications.enabled {
            return Err(ConfigError::Invalid(
                "automation.notifications.enabled requires webhook_url".to_string(),
            ));
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }
        Ok(())
    }
}

/// Serde adapter for human-readable durations ("3s", "5m", "1h 30m").
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
