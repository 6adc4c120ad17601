//! Allow/deny time-window model for automated relocations.
//!
//! A [`ScheduleConfig`] is an ordered list of named [`TimeWindow`]s. Each
//! window covers a set of weekdays and a half-open time-of-day range
//! `[start, end)`; an `end` earlier than `start` denotes a window that
//! crosses midnight. The evaluation rules live in `drift-schedule`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest accepted UTC offset, in minutes (±14h).
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// ── Day of week ───────────────────────────────────────────────────

/// Day of the week, ordered Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    /// Day from its zero-based index counted from Monday.
    pub fn from_monday_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        DayOfWeek::ALL
            .into_iter()
            .find(|day| day.as_str() == lower || day.as_str()[..3] == lower)
            .ok_or_else(|| ConfigError::InvalidDay(s.to_string()))
    }
}

impl TryFrom<String> for DayOfWeek {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayOfWeek> for String {
    fn from(day: DayOfWeek) -> Self {
        day.as_str().to_string()
    }
}

// ── Time of day ───────────────────────────────────────────────────

/// Wall-clock time of day with minute resolution (`HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn new(hour: u32, minute: u32) -> Result<Self, ConfigError> {
        if hour > 23 || minute > 59 {
            return Err(ConfigError::InvalidTime(format!("{hour}:{minute}")));
        }
        Ok(Self((hour * 60 + minute) as u16))
    }

    /// Minutes elapsed since midnight.
    pub fn minutes(&self) -> u16 {
        self.0
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        if minute.len() != 2 {
            return Err(invalid());
        }
        let hour = hour.parse::<u32>().map_err(|_| invalid())?;
        let minute = minute.parse::<u32>().map_err(|_| invalid())?;
        TimeOfDay::new(hour, minute).map_err(|_| invalid())
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(time: TimeOfDay) -> Self {
        time.to_string()
    }
}

// ── Windows ───────────────────────────────────────────────────────

/// Whether a window permits or forbids relocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    Allow,
    /// Blackout window. Overrides any matching allow window.
    Deny,
}

/// A named recurring time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub name: String,
    pub mode: WindowMode,
    pub days: BTreeSet<DayOfWeek>,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TimeWindow {
    pub fn new(
        name: &str,
        mode: WindowMode,
        days: impl IntoIterator<Item = DayOfWeek>,
        start: TimeOfDay,
        end: TimeOfDay,
    ) -> Self {
        Self {
            name: name.to_string(),
            mode,
            days: days.into_iter().collect(),
            start,
            end,
            enabled: true,
        }
    }

    /// Whether the window wraps past midnight.
    pub fn is_overnight(&self) -> bool {
        self.end < self.start
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidWindow {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.days.is_empty() {
            return Err(invalid("at least one day is required"));
        }
        if self.start == self.end {
            return Err(invalid("start and end must differ"));
        }
        Ok(())
    }
}

/// Ordered window list plus the offset used to derive local time.
///
/// An empty window list permits every instant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub windows: Vec<TimeWindow>,
    /// Offset of the cluster's local time from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl ScheduleConfig {
    pub fn new(windows: Vec<TimeWindow>) -> Self {
        Self {
            windows,
            utc_offset_minutes: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes {} out of range",
                self.utc_offset_minutes
            )));
        }
        for window in &self.windows {
            window.validate()?;
        }
        Ok(())
    }
}
