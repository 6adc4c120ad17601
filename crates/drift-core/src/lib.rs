//! drift-core — shared vocabulary for the Drift relocation core.
//!
//! Holds the guest/task/request types every other crate speaks, the
//! allow/deny time-window model consumed by `drift-schedule`, and the
//! `drift.toml` daemon configuration.

pub mod config;
pub mod error;
pub mod schedule;
pub mod types;

pub use config::DriftConfig;
pub use error::ConfigError;
pub use schedule::{DayOfWeek, ScheduleConfig, TimeOfDay, TimeWindow, WindowMode};
pub use types::*;
