mod file_config;

pub use file_config::{DebugConfig, FileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub inventory_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub backup_command: Option<String>,
    pub max_concurrent_jobs: usize,
    pub old_backup_days: i64,
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub inventory_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub backup_command: Option<String>,
    pub max_concurrent_jobs: usize,
    pub old_backup_days: i64,
    pub check_interval_secs: u64,

    // Debug knobs (with defaults)
    pub fake_schedule_minutes: Option<u32>,
    pub fake_schedule_dups: u32,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        let inventory_path = file
            .inventory_path
            .map(PathBuf::from)
            .or_else(|| cli.inventory_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "inventory_path must be specified via --inventory-path or in config file"
                )
            })?;

        let backup_dir = file
            .backup_dir
            .map(PathBuf::from)
            .or_else(|| cli.backup_dir.clone());
        if let Some(dir) = &backup_dir {
            if dir.exists() && !dir.is_dir() {
                bail!("backup_dir is not a directory: {:?}", dir);
            }
        }

        let backup_command = file.backup_command.or_else(|| cli.backup_command.clone());

        let max_concurrent_jobs = file
            .max_concurrent_jobs
            .unwrap_or(cli.max_concurrent_jobs)
            .max(1);
        let old_backup_days = file.old_backup_days.unwrap_or(cli.old_backup_days).max(0);
        let check_interval_secs = file
            .check_interval_secs
            .unwrap_or(cli.check_interval_secs)
            .max(1);

        let debug = file.debug.unwrap_or_default();
        let fake_schedule_minutes = debug.fake_schedule_minutes.filter(|m| *m > 0);
        let fake_schedule_dups = debug.fake_schedule_dups.unwrap_or(0);

        Ok(Self {
            db_path,
            inventory_path,
            backup_dir,
            backup_command,
            max_concurrent_jobs,
            old_backup_days,
            check_interval_secs,
            fake_schedule_minutes,
            fake_schedule_dups,
        })
    }
}
