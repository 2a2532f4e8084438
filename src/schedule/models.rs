use crate::packages::{MAIN_FILTER_DEFAULT, MODE_ALL};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Sub-filter on installation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstalledFilter {
    #[default]
    All,
    Installed,
    NotInstalled,
}

/// Sub-filter on launcher visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchableFilter {
    #[default]
    All,
    Launchable,
    NotLaunchable,
}

/// Sub-filter on update state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatedFilter {
    #[default]
    All,
    Updated,
    New,
    NotUpdated,
}

/// Sub-filter on enabled/disabled state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnabledFilter {
    #[default]
    All,
    Enabled,
    Disabled,
}

/// Sub-filter on backup age. `Old` keeps packages whose latest backup is at
/// least the configured day threshold old; `New` keeps the rest. Packages
/// without any backup fall under `New`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatestFilter {
    #[default]
    All,
    Old,
    New,
}

/// The secondary predicates applied after the main-category filter,
/// AND-combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialFilter {
    #[serde(default)]
    pub installed: InstalledFilter,
    #[serde(default)]
    pub launchable: LaunchableFilter,
    #[serde(default)]
    pub updated: UpdatedFilter,
    #[serde(default)]
    pub enabled: EnabledFilter,
    #[serde(default)]
    pub latest: LatestFilter,
}

/// A persisted recurrence definition: which packages to back up, when, and
/// with which component modes. Immutable per run; `time_placed` is rewritten
/// by the dispatcher when a periodic run consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Interval between runs, in days (minutes when the debug fake-interval
    /// mode is configured).
    pub interval: u32,
    pub time_hour: u8,
    pub time_minute: u8,
    /// Anchor for interval math, set when the schedule was placed or last
    /// consumed by a periodic run.
    pub time_placed: DateTime<Utc>,
    /// Component bitset (MODE_APK | MODE_DATA | ...).
    pub mode: u32,
    /// Main-category bitset (MAIN_FILTER_SYSTEM | MAIN_FILTER_USER | ...).
    pub main_filter: u32,
    pub special_filter: SpecialFilter,
    pub block_list: Vec<String>,
    pub custom_list: Vec<String>,
    pub tags_list: Vec<String>,
}

impl Schedule {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            enabled: false,
            interval: 1,
            time_hour: 0,
            time_minute: 0,
            time_placed: Utc::now(),
            mode: MODE_ALL,
            main_filter: MAIN_FILTER_DEFAULT,
            special_filter: SpecialFilter::default(),
            block_list: Vec::new(),
            custom_list: Vec::new(),
            tags_list: Vec::new(),
        }
    }

    /// Copy of this schedule with the anchor advanced to `now`.
    pub fn with_time_placed(&self, now: DateTime<Utc>) -> Self {
        Self {
            time_placed: now,
            ..self.clone()
        }
    }

    /// The first due time strictly after `now`.
    ///
    /// Normal mode steps in whole days from today's configured time of day.
    /// With `fake_minutes` set (debug), runs land on the next multiple of
    /// that many minutes instead, so interval behavior can be observed
    /// without waiting a day.
    pub fn next_run_after(
        &self,
        now: DateTime<Utc>,
        fake_minutes: Option<u32>,
    ) -> DateTime<Utc> {
        match fake_minutes {
            Some(minutes) => {
                let step = i64::from(minutes.max(1));
                let truncated = match now.with_second(0).and_then(|t| t.with_nanosecond(0)) {
                    Some(t) => t,
                    None => now,
                };
                let mut candidate =
                    truncated - Duration::minutes(i64::from(truncated.minute()) % step);
                while candidate <= now {
                    candidate += Duration::minutes(step);
                }
                candidate
            }
            None => {
                let interval_days = i64::from(self.interval.max(1));
                let hour = u32::from(self.time_hour.min(23));
                let minute = u32::from(self.time_minute.min(59));
                let mut candidate = match now
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .map(|t| t.and_utc())
                {
                    Some(t) => t,
                    None => now,
                };
                while candidate <= now {
                    candidate += Duration::days(interval_days);
                }
                candidate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_run_same_day_when_time_still_ahead() {
        let mut schedule = Schedule::new("nightly");
        schedule.time_hour = 22;
        schedule.time_minute = 30;
        schedule.interval = 1;

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let next = schedule.next_run_after(now, None);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 10, 22, 30, 0).unwrap());
    }

    #[test]
    fn test_next_run_steps_by_interval_days_when_passed() {
        let mut schedule = Schedule::new("every-third-day");
        schedule.time_hour = 6;
        schedule.time_minute = 0;
        schedule.interval = 3;

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let next = schedule.next_run_after(now, None);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 13, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_exact_due_time_moves_to_next_interval() {
        let mut schedule = Schedule::new("nightly");
        schedule.time_hour = 6;
        schedule.time_minute = 0;
        schedule.interval = 1;

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let next = schedule.next_run_after(now, None);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_fake_minutes_rounds_to_boundary() {
        let schedule = Schedule::new("debug");

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 7, 30).unwrap();
        let next = schedule.next_run_after(now, Some(5));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 10, 12, 10, 0).unwrap());
    }

    #[test]
    fn test_next_run_fake_minutes_on_boundary_advances() {
        let schedule = Schedule::new("debug");

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 10, 0).unwrap();
        let next = schedule.next_run_after(now, Some(5));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 10, 12, 15, 0).unwrap());
    }

    #[test]
    fn test_with_time_placed_only_touches_anchor() {
        let schedule = Schedule::new("anchor");
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let updated = schedule.with_time_placed(now);
        assert_eq!(updated.time_placed, now);
        assert_eq!(updated.name, schedule.name);
        assert_eq!(updated.interval, schedule.interval);
    }

    #[test]
    fn test_special_filter_serde_round_trip() {
        let filter = SpecialFilter {
            installed: InstalledFilter::Installed,
            launchable: LaunchableFilter::All,
            updated: UpdatedFilter::New,
            enabled: EnabledFilter::Enabled,
            latest: LatestFilter::Old,
        };
        let json = serde_json::to_string(&filter).unwrap();
        let parsed: SpecialFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, filter);
    }
}
