//! Schedule definitions and their persistence contracts.

mod models;
mod schema;
mod sqlite_schedule_store;

pub use models::{
    EnabledFilter, InstalledFilter, LatestFilter, LaunchableFilter, Schedule, SpecialFilter,
    UpdatedFilter,
};
pub use sqlite_schedule_store::SqliteScheduleStore;

use crate::packages::AppExtras;
use anyhow::Result;
use std::collections::HashSet;

/// Read/update contract for persisted schedules.
pub trait ScheduleStore: Send + Sync {
    fn insert(&self, schedule: &Schedule) -> Result<i64>;
    fn get(&self, id: i64) -> Result<Option<Schedule>>;
    fn update(&self, schedule: &Schedule) -> Result<()>;
    fn get_all(&self) -> Result<Vec<Schedule>>;
    fn delete(&self, id: i64) -> Result<bool>;
}

/// The global (schedule-independent) package blocklist.
pub trait BlocklistStore: Send + Sync {
    fn get_global_blocklist(&self) -> Result<HashSet<String>>;
    fn add_to_blocklist(&self, package_name: &str) -> Result<()>;
    fn remove_from_blocklist(&self, package_name: &str) -> Result<bool>;
}

/// Per-package extras (custom tags, notes).
pub trait AppExtrasStore: Send + Sync {
    fn get_all_extras(&self) -> Result<Vec<AppExtras>>;
    fn set_extras(&self, extras: &AppExtras) -> Result<()>;
}
