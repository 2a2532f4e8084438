//! In-process work queue backed by a bounded worker pool.
//!
//! Each item runs a [`PackageJobRunner`] on a blocking thread; a semaphore
//! caps how many run at once. Unique keys map to cancellation tokens so a
//! replacement submission can cancel the incumbent.

use super::{SubmitPolicy, WorkCompletion, WorkHandle, WorkItem, WorkQueue};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Executes the actual per-package backup/restore work. The mechanics
/// (shell, archiving, encryption) live behind this seam.
pub trait PackageJobRunner: Send + Sync {
    fn run(&self, item: &WorkItem) -> WorkCompletion;
}

/// Runs the configured external command with the package name, mode and
/// direction as arguments, mapping the exit status to the outcome.
pub struct CommandJobRunner {
    command: String,
}

impl CommandJobRunner {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl PackageJobRunner for CommandJobRunner {
    fn run(&self, item: &WorkItem) -> WorkCompletion {
        let mut argv = match shlex::split(&self.command) {
            Some(argv) if !argv.is_empty() => argv,
            _ => {
                return WorkCompletion::failed(&item.package_name, "backup command is empty")
            }
        };
        let program = argv.remove(0);
        let output = std::process::Command::new(&program)
            .args(&argv)
            .arg(&item.package_name)
            .arg(item.mode.to_string())
            .arg(item.direction.as_str())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                WorkCompletion::succeeded(&item.package_name)
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let message = match stderr.trim() {
                    "" => format!("{} exited with {}", program, output.status),
                    detail => detail.to_string(),
                };
                WorkCompletion::failed(&item.package_name, &message)
            }
            Err(e) => WorkCompletion::failed(
                &item.package_name,
                &format!("failed to launch {}: {}", program, e),
            ),
        }
    }
}

/// Logs the item and reports success. Used when no backup command is
/// configured (dry-run daemon mode).
pub struct LoggingJobRunner;

impl PackageJobRunner for LoggingJobRunner {
    fn run(&self, item: &WorkItem) -> WorkCompletion {
        info!(
            "[{}] dry-run {} of {} (mode {:#x})",
            item.batch_id,
            item.direction.as_str(),
            item.package_name,
            item.mode
        );
        WorkCompletion::succeeded(&item.package_name)
    }
}

struct ActiveJob {
    submission_id: Uuid,
    cancel: CancellationToken,
}

/// Bounded in-process implementation of [`WorkQueue`].
pub struct LocalWorkQueue {
    runner: Arc<dyn PackageJobRunner>,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<String, ActiveJob>>>,
}

impl LocalWorkQueue {
    pub fn new(runner: Arc<dyn PackageJobRunner>, max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    fn cancel_incumbent(&self, key: &str) {
        if let Some(job) = self.active.lock().unwrap().remove(key) {
            debug!("cancelling incumbent work for key {}", key);
            job.cancel.cancel();
        }
    }
}

#[async_trait]
impl WorkQueue for LocalWorkQueue {
    async fn submit_unique(
        &self,
        key: &str,
        policy: SubmitPolicy,
        item: WorkItem,
    ) -> Result<WorkHandle> {
        let (completion_tx, completion_rx) = mpsc::channel(4);

        {
            let has_incumbent = self.active.lock().unwrap().contains_key(key);
            if has_incumbent {
                match policy {
                    SubmitPolicy::Update => {
                        warn!(
                            "work for key {} already enqueued, dropping new submission",
                            key
                        );
                        // The handle's channel closes without a completion.
                        return Ok(WorkHandle::new(key.to_string(), completion_rx));
                    }
                    SubmitPolicy::Replace | SubmitPolicy::CancelAndReenqueue => {
                        self.cancel_incumbent(key);
                    }
                }
            }
        }

        let cancel = CancellationToken::new();
        let submission_id = Uuid::new_v4();
        self.active.lock().unwrap().insert(
            key.to_string(),
            ActiveJob {
                submission_id,
                cancel: cancel.clone(),
            },
        );
        debug!(
            "[{}] submitting work {} for {}",
            item.batch_id, submission_id, item.package_name
        );

        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        let key_owned = key.to_string();
        let package_name = item.package_name.clone();

        tokio::spawn(async move {
            let completion = run_one(runner, permits, cancel, item).await;
            {
                // only deregister our own entry, not a replacement's
                let mut active = active.lock().unwrap();
                if active.get(&key_owned).map(|j| j.submission_id) == Some(submission_id) {
                    active.remove(&key_owned);
                }
            }
            if completion_tx.send(completion).await.is_err() {
                debug!("completion receiver for {} dropped", package_name);
            }
        });

        Ok(WorkHandle::new(key.to_string(), completion_rx))
    }

    async fn cancel_by_key(&self, key: &str) {
        self.cancel_incumbent(key);
    }
}

async fn run_one(
    runner: Arc<dyn PackageJobRunner>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    item: WorkItem,
) -> WorkCompletion {
    let permit = tokio::select! {
        permit = permits.acquire_owned() => permit,
        _ = cancel.cancelled() => {
            return WorkCompletion::failed(&item.package_name, "cancelled");
        }
    };
    let _permit = match permit {
        Ok(permit) => permit,
        Err(_) => return WorkCompletion::failed(&item.package_name, "queue shut down"),
    };
    if cancel.is_cancelled() {
        return WorkCompletion::failed(&item.package_name, "cancelled");
    }

    let package_name = item.package_name.clone();
    let result = tokio::task::spawn_blocking(move || runner.run(&item)).await;
    match result {
        Ok(completion) => completion,
        Err(e) => {
            warn!("work for {} panicked: {}", package_name, e);
            WorkCompletion::failed(&package_name, &format!("job panicked: {}", e))
        }
    }
}
