//! Backup-index refresh with staged progress reporting.
//!
//! A refresh invalidates cached backup data, rescans the backup location
//! and, on a full refresh, rewrites the app tables. Progress moves through a
//! linear state machine; every transition is validated so a terminal state
//! can never be left and no stage can be skipped.

use crate::metrics;
use crate::notify::ReportSink;
use crate::packages::LocationError;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

/// Stages of one refresh invocation, each with a fixed percent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Pending,
    Invalidating,
    Scanning,
    Updating,
    Completed,
    Failed,
}

impl RefreshState {
    pub fn percent(&self) -> u8 {
        match self {
            RefreshState::Pending => 0,
            RefreshState::Invalidating => 5,
            RefreshState::Scanning => 30,
            RefreshState::Updating => 80,
            RefreshState::Completed => 100,
            RefreshState::Failed => 100,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RefreshState::Pending => "pending",
            RefreshState::Invalidating => "invalidating",
            RefreshState::Scanning => "scanning",
            RefreshState::Updating => "updating",
            RefreshState::Completed => "completed",
            RefreshState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshState::Completed | RefreshState::Failed)
    }
}

/// Rejected state transition.
#[derive(Debug, thiserror::Error)]
#[error("invalid refresh transition {from:?} -> {to:?}")]
pub struct RefreshTransitionError {
    pub from: RefreshState,
    pub to: RefreshState,
}

/// Transition validator for one invocation. The order is linear with a
/// single branch: a single-package refresh skips `Updating` by design.
#[derive(Debug)]
pub struct RefreshProgress {
    current: RefreshState,
}

impl Default for RefreshProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshProgress {
    pub fn new() -> Self {
        Self {
            current: RefreshState::Pending,
        }
    }

    pub fn current(&self) -> RefreshState {
        self.current
    }

    pub fn advance(&mut self, to: RefreshState) -> Result<(), RefreshTransitionError> {
        use RefreshState::*;
        let allowed = match (self.current, to) {
            (Pending, Invalidating) => true,
            (Invalidating, Scanning) => true,
            (Scanning, Updating) => true,
            (Scanning, Completed) => true,
            (Updating, Completed) => true,
            // any non-terminal state may fail
            (Pending, Failed) => true,
            (Invalidating, Failed) => true,
            (Scanning, Failed) => true,
            (Updating, Failed) => true,
            // everything else, including anything out of a terminal state
            (Pending, Pending) => false,
            (Pending, Scanning) => false,
            (Pending, Updating) => false,
            (Pending, Completed) => false,
            (Invalidating, Pending) => false,
            (Invalidating, Invalidating) => false,
            (Invalidating, Updating) => false,
            (Invalidating, Completed) => false,
            (Scanning, Pending) => false,
            (Scanning, Invalidating) => false,
            (Scanning, Scanning) => false,
            (Updating, Pending) => false,
            (Updating, Invalidating) => false,
            (Updating, Scanning) => false,
            (Updating, Updating) => false,
            (Completed, _) => false,
            (Failed, _) => false,
        };
        if allowed {
            self.current = to;
            Ok(())
        } else {
            Err(RefreshTransitionError {
                from: self.current,
                to,
            })
        }
    }
}

/// What to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    Full,
    Package(String),
}

/// External collaborator maintaining the backup index.
pub trait BackupIndex: Send + Sync {
    fn invalidate_all(&self);
    fn invalidate_package(&self, package_name: &str);
    /// Scan the backup location; returns the number of backups found.
    fn scan(&self, scope: &RefreshScope) -> Result<usize>;
    /// Rewrite the app tables from scan results (full refresh only).
    fn update_app_tables(&self) -> Result<()>;
}

/// Result of one refresh invocation.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub state: RefreshState,
    pub message: String,
    pub backups_found: usize,
}

/// Drives one refresh through the state machine, reporting each stage.
pub struct RefreshWorker {
    index: Arc<dyn BackupIndex>,
    sink: Arc<dyn ReportSink>,
}

impl RefreshWorker {
    pub fn new(index: Arc<dyn BackupIndex>, sink: Arc<dyn ReportSink>) -> Self {
        Self { index, sink }
    }

    /// Run a refresh to a terminal state. Never returns an error; failures
    /// are reported through the sink and folded into the outcome.
    pub fn run(&self, scope: &RefreshScope) -> RefreshOutcome {
        let mut progress = RefreshProgress::new();
        match self.try_run(scope, &mut progress) {
            Ok(backups_found) => {
                metrics::record_refresh_run("completed");
                RefreshOutcome {
                    state: RefreshState::Completed,
                    message: "Refresh completed".to_string(),
                    backups_found,
                }
            }
            Err(e) => {
                let message = match e.downcast_ref::<LocationError>() {
                    Some(location) => location.to_string(),
                    None => e.to_string(),
                };
                error!("Refresh failed: {:#}", e);
                // FAILED reports the percent of the state it failed from
                let percent = progress.current().percent();
                if progress.advance(RefreshState::Failed).is_ok() {
                    self.report(RefreshState::Failed, &message, Some(percent));
                }
                self.sink.report_failure(&message);
                metrics::record_refresh_run("failed");
                RefreshOutcome {
                    state: RefreshState::Failed,
                    message,
                    backups_found: 0,
                }
            }
        }
    }

    fn try_run(&self, scope: &RefreshScope, progress: &mut RefreshProgress) -> Result<usize> {
        let is_full = matches!(scope, RefreshScope::Full);
        info!(
            "Starting refresh: {}",
            match scope {
                RefreshScope::Full => "FULL".to_string(),
                RefreshScope::Package(name) => format!("package: {}", name),
            }
        );

        progress.advance(RefreshState::Invalidating)?;
        match scope {
            RefreshScope::Full => {
                self.report(RefreshState::Invalidating, "Invalidating all cached backups", None);
                self.index.invalidate_all();
            }
            RefreshScope::Package(name) => {
                self.report(
                    RefreshState::Invalidating,
                    &format!("Invalidating cached backups of {}", name),
                    None,
                );
                self.index.invalidate_package(name);
            }
        }

        progress.advance(RefreshState::Scanning)?;
        self.report(RefreshState::Scanning, "Scanning backup directories", None);
        let backups_found = self.index.scan(scope)?;

        if is_full {
            progress.advance(RefreshState::Updating)?;
            self.report(RefreshState::Updating, "Updating app tables", None);
            self.index.update_app_tables()?;
        }

        progress.advance(RefreshState::Completed)?;
        self.report(RefreshState::Completed, "Refresh completed", None);
        info!("Refresh completed successfully, {} backups", backups_found);
        Ok(backups_found)
    }

    fn report(&self, state: RefreshState, message: &str, percent_override: Option<u8>) {
        let percent = percent_override.unwrap_or_else(|| state.percent());
        self.sink.show_progress(state.name(), message, percent);
    }
}
