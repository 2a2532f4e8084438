use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub inventory_path: Option<String>,
    pub backup_dir: Option<String>,
    pub backup_command: Option<String>,
    pub max_concurrent_jobs: Option<usize>,
    pub old_backup_days: Option<i64>,
    pub check_interval_secs: Option<u64>,

    // Debug knobs
    pub debug: Option<DebugConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DebugConfig {
    /// Treat schedule intervals as this many minutes instead of days.
    pub fake_schedule_minutes: Option<u32>,
    /// Repeat every dispatch cycle this many extra times.
    pub fake_schedule_dups: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
