//! Schedule dispatch: the entry point invoked by the timer or a user action.
//!
//! One invocation composes the run guard, the package selector and the
//! fan-out orchestrator. Every failure is recovered at this boundary and
//! converted into a report; nothing below is allowed to escape.

mod batch;
mod timer;

pub use batch::{batch_name, BatchOutcome, WorkOrchestrator};
pub use timer::{ScheduleTimer, TimerCommand, TimerHandle};

use crate::guard::RunGuard;
use crate::keepalive::KeepAlive;
use crate::metrics;
use crate::notify::ReportSink;
use crate::packages::{filter_packages, AppExtras, BackupRoot, Package, PackageSource};
use crate::schedule::{AppExtrasStore, BlocklistStore, Schedule, ScheduleStore};
use crate::work::{BackupDirection, WorkQueue};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What caused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::Manual => "manual",
        }
    }
}

/// Outcome classification of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Completed,
    /// Another run of the same schedule is active; this one was ignored.
    DuplicateRun,
    /// The filter pipeline selected nothing; begin/end were still paired.
    EmptySelection,
    NotFound,
    /// Periodic trigger for a schedule that is disabled.
    Disabled,
    LocationUnavailable,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Completed => "completed",
            DispatchStatus::DuplicateRun => "duplicate",
            DispatchStatus::EmptySelection => "empty",
            DispatchStatus::NotFound => "not_found",
            DispatchStatus::Disabled => "disabled",
            DispatchStatus::LocationUnavailable => "location_unavailable",
            DispatchStatus::Failed => "failed",
        }
    }
}

/// Result surfaced to the caller and the log.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub schedule_id: i64,
    pub status: DispatchStatus,
    pub batch: Option<BatchOutcome>,
    /// Display-ready message for non-completed outcomes.
    pub message: Option<String>,
}

impl DispatchReport {
    fn new(schedule_id: i64, status: DispatchStatus) -> Self {
        Self {
            schedule_id,
            status,
            batch: None,
            message: None,
        }
    }

    fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    fn with_batch(mut self, batch: BatchOutcome) -> Self {
        self.batch = Some(batch);
        self
    }
}

/// Tunables resolved from configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Day threshold for the "old backups" special filter.
    pub old_backup_days: i64,
    /// Debug mode: schedule intervals count minutes instead of days.
    pub fake_schedule_minutes: Option<u32>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            old_backup_days: 30,
            fake_schedule_minutes: None,
        }
    }
}

/// Entry point for schedule runs.
pub struct ScheduleDispatcher {
    schedules: Arc<dyn ScheduleStore>,
    blocklist: Arc<dyn BlocklistStore>,
    extras: Arc<dyn AppExtrasStore>,
    packages: Arc<dyn PackageSource>,
    backup_root: Arc<dyn BackupRoot>,
    orchestrator: WorkOrchestrator,
    guard: Arc<RunGuard>,
    keep_alive: Arc<KeepAlive>,
    sink: Arc<dyn ReportSink>,
    settings: DispatcherSettings,
}

impl ScheduleDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        blocklist: Arc<dyn BlocklistStore>,
        extras: Arc<dyn AppExtrasStore>,
        packages: Arc<dyn PackageSource>,
        backup_root: Arc<dyn BackupRoot>,
        queue: Arc<dyn WorkQueue>,
        guard: Arc<RunGuard>,
        keep_alive: Arc<KeepAlive>,
        sink: Arc<dyn ReportSink>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            schedules,
            blocklist,
            extras,
            packages,
            backup_root,
            orchestrator: WorkOrchestrator::new(queue),
            guard,
            keep_alive,
            sink,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn guard(&self) -> &Arc<RunGuard> {
        &self.guard
    }

    /// Run a schedule. `repeat_count` repeats the whole dispatch cycle that
    /// many extra times, back to back; it exists to exercise duplicate-run
    /// handling and is normally 0.
    pub async fn run(
        &self,
        schedule_id: i64,
        trigger: Trigger,
        repeat_count: u32,
    ) -> DispatchReport {
        let _keep_alive = self.keep_alive.acquire();
        info!(
            "[{}] dispatch starting (trigger={}, repeats={})",
            schedule_id,
            trigger.as_str(),
            repeat_count
        );

        let mut report = DispatchReport::new(schedule_id, DispatchStatus::Failed);
        for attempt in 0..=repeat_count {
            report = self.dispatch_once(schedule_id, trigger).await;
            metrics::record_schedule_run(report.status.as_str());
            metrics::set_running_schedules(self.guard.running_count());
            match report.status {
                DispatchStatus::NotFound
                | DispatchStatus::Disabled
                | DispatchStatus::LocationUnavailable
                | DispatchStatus::Failed => break,
                _ => {}
            }
            if attempt < repeat_count {
                info!("[{}] repeating dispatch ({}/{})", schedule_id, attempt + 1, repeat_count);
            }
        }
        report
    }

    async fn dispatch_once(&self, schedule_id: i64, trigger: Trigger) -> DispatchReport {
        match self.try_dispatch(schedule_id, trigger).await {
            Ok(report) => report,
            Err(e) => {
                error!("[{}] dispatch failed: {:#}", schedule_id, e);
                DispatchReport::new(schedule_id, DispatchStatus::Failed)
                    .with_message(format!("Schedule run failed: {}", e))
            }
        }
    }

    async fn try_dispatch(&self, schedule_id: i64, trigger: Trigger) -> Result<DispatchReport> {
        let schedule = match self.schedules.get(schedule_id)? {
            Some(schedule) => schedule,
            None => {
                warn!("[{}] no such schedule", schedule_id);
                return Ok(DispatchReport::new(schedule_id, DispatchStatus::NotFound)
                    .with_message("Schedule not found".to_string()));
            }
        };
        if trigger == Trigger::Periodic && !schedule.enabled {
            return Ok(DispatchReport::new(schedule_id, DispatchStatus::Disabled));
        }

        // Atomic duplicate rejection; the token ends the run when it drops,
        // on every path out of this function.
        let _token = match self.guard.begin(schedule_id) {
            Some(token) => token,
            None => {
                return Ok(DispatchReport::new(schedule_id, DispatchStatus::DuplicateRun)
                    .with_message(format!(
                        "Schedule '{}' is already running, ignored",
                        schedule.name
                    )));
            }
        };
        metrics::set_running_schedules(self.guard.running_count());

        if let Err(e) = self.backup_root.ensure_accessible() {
            warn!("[{}] schedule aborted: {}", schedule_id, e);
            self.sink.report_failure(&e.to_string());
            return Ok(
                DispatchReport::new(schedule_id, DispatchStatus::LocationUnavailable)
                    .with_message(e.to_string()),
            );
        }

        let now = Utc::now();
        let selected = self.select_packages(&schedule, now)?;
        if selected.is_empty() {
            // begin/end stay paired, only the fan-out is skipped
            info!("[{}] no packages matching", schedule_id);
            self.sink
                .report_failure(&format!("{}: no packages to back up", schedule.name));
            return Ok(
                DispatchReport::new(schedule_id, DispatchStatus::EmptySelection)
                    .with_batch(BatchOutcome::no_work(batch_name(&schedule.name, now))),
            );
        }

        if trigger == Trigger::Periodic {
            // advance the interval anchor before any work is queued
            self.schedules.update(&schedule.with_time_placed(now))?;
        }

        let outcome = self
            .orchestrator
            .run_batch(&schedule, &selected, BackupDirection::Backup, now)
            .await?;
        // partial failures still complete the batch; all_succeeded carries them
        Ok(DispatchReport::new(schedule_id, DispatchStatus::Completed).with_batch(outcome))
    }

    fn select_packages(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<Vec<Package>> {
        let global_blocklist = self.blocklist.get_global_blocklist()?;
        let extras_map: HashMap<String, AppExtras> = self
            .extras
            .get_all_extras()?
            .into_iter()
            .map(|extras| (extras.package_name.clone(), extras))
            .collect();
        let installed = self.packages.list_installed()?;
        Ok(filter_packages(
            &installed,
            &extras_map,
            schedule,
            &global_blocklist,
            self.settings.old_backup_days,
            now,
        ))
    }
}
