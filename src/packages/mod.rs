//! Installed-package inventory and selection filters.
//!
//! The package source is an external collaborator: on a device it would be
//! the platform package manager, here it is a trait with a JSON-inventory
//! implementation used by the daemon binary and hand-rolled fakes in tests.

mod filter;
mod inventory;

pub use filter::filter_packages;
pub use inventory::{FsBackupRoot, JsonFilePackageSource};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Component bitset for backup modes. A schedule's `mode` is an OR of these.
pub const MODE_UNSET: u32 = 0;
pub const MODE_APK: u32 = 1 << 0;
pub const MODE_DATA: u32 = 1 << 1;
pub const MODE_DATA_DE: u32 = 1 << 2;
pub const MODE_DATA_EXT: u32 = 1 << 3;
pub const MODE_DATA_OBB: u32 = 1 << 4;
pub const MODE_DATA_MEDIA: u32 = 1 << 5;
pub const MODE_ALL: u32 =
    MODE_APK | MODE_DATA | MODE_DATA_DE | MODE_DATA_EXT | MODE_DATA_OBB | MODE_DATA_MEDIA;

// Main-category bitset. Independently enabled bits, OR-combined when filtering.
pub const MAIN_FILTER_SYSTEM: u32 = 1 << 0;
pub const MAIN_FILTER_USER: u32 = 1 << 1;
pub const MAIN_FILTER_SPECIAL: u32 = 1 << 2;
pub const MAIN_FILTER_DEFAULT: u32 = MAIN_FILTER_SYSTEM | MAIN_FILTER_USER;

/// A single installed package as seen by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub package_name: String,
    pub package_label: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_special: bool,
    #[serde(default = "default_true")]
    pub is_installed: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub is_updated: bool,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_launchable: bool,
    /// Timestamp of the most recent backup, if any backup exists.
    #[serde(default)]
    pub latest_backup: Option<DateTime<Utc>>,
}

impl Package {
    pub fn has_backups(&self) -> bool {
        self.latest_backup.is_some()
    }
}

/// Per-package user-assigned extras (custom tags, note).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppExtras {
    pub package_name: String,
    #[serde(default)]
    pub custom_tags: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Source of the installed-package list.
pub trait PackageSource: Send + Sync {
    fn list_installed(&self) -> Result<Vec<Package>>;
}

/// The backup storage location may be missing, unconfigured or unreadable.
/// Both cases abort the current operation with a user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("backup location is not configured")]
    NotConfigured,
    #[error("backup location is inaccessible: {0}")]
    Inaccessible(String),
}

/// Validation seam for the backup storage location.
pub trait BackupRoot: Send + Sync {
    fn ensure_accessible(&self) -> Result<(), LocationError>;
}

fn default_true() -> bool {
    true
}
