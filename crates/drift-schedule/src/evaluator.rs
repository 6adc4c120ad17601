//! Time-window evaluation.
//!
//! Pure functions over a [`ScheduleConfig`] and an instant. The only
//! clock-dependent step is converting the instant to local wall-clock
//! time with the configured fixed UTC offset.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use serde::Serialize;
use tracing::debug;

use drift_core::{DayOfWeek, ScheduleConfig, TimeOfDay, TimeWindow, WindowMode};

/// Why an instant was permitted or denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    /// No enabled windows are configured.
    NoWindows,
    /// A deny window matched.
    InBlackout { window: String },
    /// An allow window matched and no deny window did.
    InWindow { window: String },
    /// Allow windows exist but none matched.
    OutsideAllWindows,
    /// Only deny windows exist and none matched.
    NoBlackoutMatched,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::NoWindows => f.write_str("no windows defined (always allowed)"),
            DecisionReason::InBlackout { window } => write!(f, "in blackout: {window}"),
            DecisionReason::InWindow { window } => write!(f, "in window: {window}"),
            DecisionReason::OutsideAllWindows => f.write_str("outside all migration windows"),
            DecisionReason::NoBlackoutMatched => f.write_str("not in any blackout window"),
        }
    }
}

/// Outcome of evaluating a schedule at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub permitted: bool,
    pub reason: DecisionReason,
    /// Local weekday the instant was evaluated as.
    pub day: DayOfWeek,
    /// Local time of day the instant was evaluated as.
    pub time: TimeOfDay,
}

/// Whether relocations may run at `instant`.
pub fn is_permitted(instant: DateTime<Utc>, config: &ScheduleConfig) -> bool {
    evaluate(instant, config).permitted
}

/// Evaluate `config` at `instant`, converting to the configured local time.
pub fn evaluate(instant: DateTime<Utc>, config: &ScheduleConfig) -> Decision {
    let (day, time) = local_time(instant, config.utc_offset_minutes);
    let decision = evaluate_local(day, time, config);
    debug!(
        %instant,
        %day,
        %time,
        permitted = decision.permitted,
        reason = %decision.reason,
        "schedule evaluated"
    );
    decision
}

/// Evaluate `config` for an already-derived local weekday and time.
pub fn evaluate_local(day: DayOfWeek, time: TimeOfDay, config: &ScheduleConfig) -> Decision {
    let decide = |permitted: bool, reason: DecisionReason| Decision {
        permitted,
        reason,
        day,
        time,
    };

    let active: Vec<&TimeWindow> = config.windows.iter().filter(|w| w.enabled).collect();
    if active.is_empty() {
        return decide(true, DecisionReason::NoWindows);
    }

    if let Some(blackout) = active
        .iter()
        .find(|w| w.mode == WindowMode::Deny && window_matches(w, day, time))
    {
        return decide(
            false,
            DecisionReason::InBlackout {
                window: blackout.name.clone(),
            },
        );
    }

    let mut allows = active
        .iter()
        .filter(|w| w.mode == WindowMode::Allow)
        .peekable();
    if allows.peek().is_none() {
        return decide(true, DecisionReason::NoBlackoutMatched);
    }

    match allows.find(|w| window_matches(w, day, time)) {
        Some(window) => decide(
            true,
            DecisionReason::InWindow {
                window: window.name.clone(),
            },
        ),
        None => decide(false, DecisionReason::OutsideAllWindows),
    }
}

/// Whether a single window covers the given local weekday and time.
///
/// The range is half-open. An overnight window only matches on its listed
/// days, on both sides of midnight.
pub fn window_matches(window: &TimeWindow, day: DayOfWeek, time: TimeOfDay) -> bool {
    if !window.enabled || !window.days.contains(&day) {
        return false;
    }
    if window.is_overnight() {
        time >= window.start || time < window.end
    } else {
        time >= window.start && time < window.end
    }
}

/// Local weekday and time of day of `instant` at a fixed UTC offset.
pub fn local_time(instant: DateTime<Utc>, utc_offset_minutes: i32) -> (DayOfWeek, TimeOfDay) {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    let local = instant.with_timezone(&offset);
    let time = TimeOfDay::new(local.hour(), local.minute()).unwrap_or(TimeOfDay::MIDNIGHT);
    (day_of(local.weekday()), time)
}

fn day_of(weekday: Weekday) -> DayOfWeek {
    match weekday {
        Weekday::Mon => DayOfWeek::Monday,
        Weekday::Tue => DayOfWeek::Tuesday,
        Weekday::Wed => DayOfWeek::Wednesday,
        Weekday::Thu => DayOfWeek::Thursday,
        Weekday::Fri => DayOfWeek::Friday,
        Weekday::Sat => DayOfWeek::Saturday,
        Weekday::Sun => DayOfWeek::Sunday,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    /// 2024-01-01 is a Monday.
    fn at(day_of_month: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day_of_month, hour, minute, 0)
            .unwrap()
    }

    fn window(name: &str, mode: WindowMode, days: &[DayOfWeek], start: &str, end: &str) -> TimeWindow {
        TimeWindow::new(name, mode, days.iter().copied(), t(start), t(end))
    }

    fn every_quarter_hour_of_week() -> impl Iterator<Item = DateTime<Utc>> {
        let base = at(1, 0, 0);
        (0..7 * 24 * 4).map(move |i| base + Duration::minutes(15 * i))
    }

    #[test]
    fn empty_schedule_permits_every_instant() {
        let config = ScheduleConfig::default();
        for instant in every_quarter_hour_of_week() {
            let decision = evaluate(instant, &config);
            assert!(decision.permitted, "denied at {instant}");
            assert_eq!(decision.reason, DecisionReason::NoWindows);
        }
    }

    #[test]
    fn disabled_windows_are_ignored() {
        let mut blackout = window("all-week", WindowMode::Deny, &DayOfWeek::ALL, "00:00", "23:59");
        blackout.enabled = false;
        let config = ScheduleConfig::new(vec![blackout]);
        assert!(is_permitted(at(3, 12, 0), &config));
    }

    #[test]
    fn deny_overrides_matching_allow() {
        let config = ScheduleConfig::new(vec![
            window("weekdays", WindowMode::Allow, &DayOfWeek::ALL, "00:00", "23:59"),
            window("business", WindowMode::Deny, &[DayOfWeek::Wednesday], "09:00", "17:00"),
        ]);
        let decision = evaluate(at(3, 10, 30), &config);
        assert!(!decision.permitted);
        assert_eq!(
            decision.reason,
            DecisionReason::InBlackout {
                window: "business".to_string()
            }
        );
        // Outside the blackout the allow window applies.
        assert!(is_permitted(at(3, 17, 0), &config));
    }

    #[test]
    fn any_matching_deny_window_denies_regardless_of_allows() {
        let config = ScheduleConfig::new(vec![
            window("always", WindowMode::Allow, &DayOfWeek::ALL, "00:00", "23:59"),
            window("nightly", WindowMode::Allow, &DayOfWeek::ALL, "22:00", "06:00"),
            window("freeze", WindowMode::Deny, &[DayOfWeek::Friday, DayOfWeek::Saturday], "20:00", "04:00"),
        ]);
        for instant in every_quarter_hour_of_week() {
            let (day, time) = local_time(instant, 0);
            let deny_matches = config
                .windows
                .iter()
                .any(|w| w.mode == WindowMode::Deny && window_matches(w, day, time));
            if deny_matches {
                assert!(!is_permitted(instant, &config), "permitted during blackout at {instant}");
            }
        }
    }

    #[test]
    fn allow_windows_deny_everything_else() {
        let config = ScheduleConfig::new(vec![window(
            "weekend",
            WindowMode::Allow,
            &[DayOfWeek::Saturday, DayOfWeek::Sunday],
            "01:00",
            "05:00",
        )]);
        assert!(is_permitted(at(6, 2, 0), &config));
        let decision = evaluate(at(6, 6, 0), &config);
        assert!(!decision.permitted);
        assert_eq!(decision.reason, DecisionReason::OutsideAllWindows);
        assert!(!is_permitted(at(2, 2, 0), &config));
    }

    #[test]
    fn deny_only_schedule_permits_outside_blackouts() {
        let config = ScheduleConfig::new(vec![window(
            "business",
            WindowMode::Deny,
            &[DayOfWeek::Monday],
            "09:00",
            "17:00",
        )]);
        let decision = evaluate(at(1, 18, 0), &config);
        assert!(decision.permitted);
        assert_eq!(decision.reason, DecisionReason::NoBlackoutMatched);
        assert!(!is_permitted(at(1, 9, 0), &config));
    }

    #[test]
    fn end_of_window_is_exclusive() {
        let config = ScheduleConfig::new(vec![window(
            "morning",
            WindowMode::Allow,
            &[DayOfWeek::Monday],
            "08:00",
            "09:00",
        )]);
        assert!(is_permitted(at(1, 8, 0), &config));
        assert!(is_permitted(at(1, 8, 59), &config));
        assert!(!is_permitted(at(1, 9, 0), &config));
    }

    #[test]
    fn overnight_window_matches_late_evening_of_listed_day() {
        let config = ScheduleConfig::new(vec![window(
            "overnight",
            WindowMode::Allow,
            &[DayOfWeek::Monday],
            "22:00",
            "06:00",
        )]);
        assert!(is_permitted(at(1, 23, 0), &config));
        assert!(is_permitted(at(1, 22, 0), &config));
        assert!(!is_permitted(at(1, 21, 59), &config));
    }

    #[test]
    fn overnight_tail_belongs_to_listed_day_not_the_next() {
        let config = ScheduleConfig::new(vec![window(
            "overnight",
            WindowMode::Allow,
            &[DayOfWeek::Monday],
            "22:00",
            "06:00",
        )]);
        // Tuesday 05:00 is not covered unless Tuesday is listed.
        assert!(!is_permitted(at(2, 5, 0), &config));
        // The early-morning part of Monday itself is covered.
        assert!(is_permitted(at(1, 5, 0), &config));
        assert!(!is_permitted(at(1, 6, 0), &config));

        let both = ScheduleConfig::new(vec![window(
            "overnight",
            WindowMode::Allow,
            &[DayOfWeek::Monday, DayOfWeek::Tuesday],
            "22:00",
            "06:00",
        )]);
        assert!(is_permitted(at(2, 5, 0), &both));
    }

    #[test]
    fn utc_offset_shifts_day_and_time() {
        // Sunday 23:30 UTC is Monday 00:30 at UTC+1.
        let instant = Utc.with_ymd_and_hms(2023, 12, 31, 23, 30, 0).unwrap();
        let (day, time) = local_time(instant, 60);
        assert_eq!(day, DayOfWeek::Monday);
        assert_eq!(time, t("00:30"));

        let mut config = ScheduleConfig::new(vec![window(
            "monday-early",
            WindowMode::Allow,
            &[DayOfWeek::Monday],
            "00:00",
            "01:00",
        )]);
        assert!(!is_permitted(instant, &config));
        config.utc_offset_minutes = 60;
        assert!(is_permitted(instant, &config));
    }

    #[test]
    fn decision_serializes_with_reason_kind() {
        let config = ScheduleConfig::default();
        let decision = evaluate(at(1, 12, 0), &config);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["permitted"], true);
        assert_eq!(json["reason"]["kind"], "no_windows");
        assert_eq!(json["day"], "monday");
        assert_eq!(json["time"], "12:00");
    }
}
