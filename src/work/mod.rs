//! External job queue contract.
//!
//! The queue owns actual execution and its own concurrency limits; this core
//! only submits uniquely-keyed units of work and consumes their completion
//! signals. Completion signals may be re-delivered; consumers must treat
//! duplicates as no-ops.

mod local_queue;

pub use local_queue::{CommandJobRunner, LocalWorkQueue, LoggingJobRunner, PackageJobRunner};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What to do when a unit of work with the same key is already enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Cancel the incumbent and enqueue the new work (one-shot runs).
    Replace,
    /// Keep the incumbent, drop the new submission (periodic re-arms).
    Update,
    /// Cancel the incumbent and enqueue fresh (periodic reschedule).
    CancelAndReenqueue,
}

/// Direction of a per-package job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupDirection {
    Backup,
    Restore,
}

impl BackupDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupDirection::Backup => "backup",
            BackupDirection::Restore => "restore",
        }
    }
}

/// One unit of per-package work. Immutable after creation; its terminal
/// outcome arrives through the completion signal.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub package_name: String,
    pub mode: u32,
    pub direction: BackupDirection,
    /// Groups all items of one schedule invocation, for log correlation.
    pub batch_id: String,
    pub notification_id: i32,
}

/// Terminal outcome of one work item.
#[derive(Debug, Clone)]
pub struct WorkCompletion {
    pub succeeded: bool,
    pub package_name: String,
    pub error: Option<String>,
}

impl WorkCompletion {
    pub fn succeeded(package_name: &str) -> Self {
        Self {
            succeeded: true,
            package_name: package_name.to_string(),
            error: None,
        }
    }

    pub fn failed(package_name: &str, error: &str) -> Self {
        Self {
            succeeded: false,
            package_name: package_name.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Handle to one submitted unit of work; exposes its completion signal.
pub struct WorkHandle {
    key: String,
    completion_rx: mpsc::Receiver<WorkCompletion>,
}

impl WorkHandle {
    pub fn new(key: String, completion_rx: mpsc::Receiver<WorkCompletion>) -> Self {
        Self { key, completion_rx }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next completion signal, `None` once the sender is gone.
    pub async fn next_completion(&mut self) -> Option<WorkCompletion> {
        self.completion_rx.recv().await
    }
}

/// The external job queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Submit a uniquely-keyed unit of work. The handle's completion channel
    /// receives the terminal outcome (possibly more than once).
    async fn submit_unique(
        &self,
        key: &str,
        policy: SubmitPolicy,
        item: WorkItem,
    ) -> Result<WorkHandle>;

    /// Best-effort cancellation of in-flight work by key.
    async fn cancel_by_key(&self, key: &str);
}
