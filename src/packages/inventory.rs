//! File-backed package source and backup-root validation.
//!
//! The daemon does not talk to a package manager directly; an external agent
//! exports the installed-package inventory as a JSON file which is re-read on
//! every schedule run.

use super::{BackupRoot, LocationError, Package, PackageSource};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Reads the installed-package list from a JSON inventory file.
pub struct JsonFilePackageSource {
    path: PathBuf,
}

impl JsonFilePackageSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PackageSource for JsonFilePackageSource {
    fn list_installed(&self) -> Result<Vec<Package>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read package inventory {:?}", self.path))?;
        let packages: Vec<Package> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse package inventory {:?}", self.path))?;
        Ok(packages)
    }
}

/// Backup location rooted at a local directory.
pub struct FsBackupRoot {
    root: Option<PathBuf>,
}

impl FsBackupRoot {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl BackupRoot for FsBackupRoot {
    fn ensure_accessible(&self) -> Result<(), LocationError> {
        let root = self.root.as_ref().ok_or(LocationError::NotConfigured)?;
        if !root.exists() {
            return Err(LocationError::Inaccessible(format!(
                "{} does not exist",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(LocationError::Inaccessible(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(())
    }
}
