//! Generic cancellable background task.
//!
//! Runs a single long operation off the calling context with progress
//! callbacks and a monotonic Pending -> Running -> Finished life cycle.
//! `execute` and `cancel` may be invoked from different threads, so the
//! status lives in an atomic cell and the terminal callback is delivered
//! exactly once no matter how completion and cancellation interleave.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Task life-cycle status. Monotonic: no way back from `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
}

const STATUS_PENDING: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_FINISHED: u8 = 2;

/// `execute` called in the wrong state; a programmer error, not a
/// recoverable condition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskStateError {
    #[error("task is already running")]
    AlreadyRunning,
    #[error("task has already been executed")]
    AlreadyFinished,
}

/// The operation a task runs. Errors are caught and logged by the runner
/// and surface as a missing result, never as a panic or propagated error.
pub trait TaskOperation<P, O>: Send + Sync + 'static {
    fn run(&self, task: &TaskContext<P>) -> Result<O>;
}

/// Callbacks observing one task. All default to no-ops.
pub trait TaskDelegate<P, O>: Send + Sync + 'static {
    fn on_progress(&self, _progress: P) {}
    fn on_finished(&self, _result: Option<O>) {}
    fn on_cancelled(&self, _result: Option<O>) {}
}

struct TaskState {
    status: AtomicU8,
    cancel_requested: AtomicBool,
    terminal_fired: AtomicBool,
}

/// Handed to the operation for progress publication and cancellation polls.
pub struct TaskContext<P> {
    state: Arc<TaskState>,
    on_progress: Arc<dyn Fn(P) + Send + Sync>,
}

impl<P> TaskContext<P> {
    /// Deliver progress, unless cancellation was requested or the task
    /// already reached its terminal callback.
    pub fn publish_progress(&self, progress: P) {
        if self.state.cancel_requested.load(Ordering::SeqCst)
            || self.state.terminal_fired.load(Ordering::SeqCst)
        {
            return;
        }
        (self.on_progress)(progress);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel_requested.load(Ordering::SeqCst)
    }
}

/// A single-shot cancellable background task.
pub struct AsyncTask<P, O> {
    state: Arc<TaskState>,
    delegate: Arc<dyn TaskDelegate<P, O>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static, O: Send + 'static> AsyncTask<P, O> {
    pub fn new(delegate: Arc<dyn TaskDelegate<P, O>>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(TaskState {
                status: AtomicU8::new(STATUS_PENDING),
                cancel_requested: AtomicBool::new(false),
                terminal_fired: AtomicBool::new(false),
            }),
            delegate,
            join_handle: Mutex::new(None),
        })
    }

    pub fn status(&self) -> TaskStatus {
        match self.state.status.load(Ordering::SeqCst) {
            STATUS_PENDING => TaskStatus::Pending,
            STATUS_RUNNING => TaskStatus::Running,
            _ => TaskStatus::Finished,
        }
    }

    /// Start the operation on a blocking worker. Only valid once, from the
    /// pending state.
    pub fn execute(
        self: &Arc<Self>,
        operation: Arc<dyn TaskOperation<P, O>>,
    ) -> Result<(), TaskStateError> {
        match self.state.status.compare_exchange(
            STATUS_PENDING,
            STATUS_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATUS_RUNNING) => return Err(TaskStateError::AlreadyRunning),
            Err(_) => return Err(TaskStateError::AlreadyFinished),
        }

        let state = Arc::clone(&self.state);
        let delegate = Arc::clone(&self.delegate);
        let handle = tokio::spawn(async move {
            let context = TaskContext {
                state: Arc::clone(&state),
                on_progress: {
                    let delegate = Arc::clone(&delegate);
                    Arc::new(move |progress| delegate.on_progress(progress))
                },
            };

            let result = tokio::task::spawn_blocking(move || operation.run(&context)).await;
            let outcome = match result {
                Ok(Ok(output)) => Some(output),
                Ok(Err(e)) => {
                    // fail-soft: callers observe a missing result, not an error
                    error!("Task execution failed: {:#}", e);
                    None
                }
                Err(e) => {
                    error!("Task panicked or was aborted: {}", e);
                    None
                }
            };

            state.status.store(STATUS_FINISHED, Ordering::SeqCst);
            if !state.terminal_fired.swap(true, Ordering::SeqCst) {
                if state.cancel_requested.load(Ordering::SeqCst) {
                    delegate.on_cancelled(outcome);
                } else {
                    delegate.on_finished(outcome);
                }
            }
        });
        *self.join_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request cancellation. Idempotent; the cancelled callback fires at
    /// most once and only if no terminal callback has fired yet.
    pub fn cancel(&self, may_interrupt: bool) {
        if self.state.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.status.store(STATUS_FINISHED, Ordering::SeqCst);

        if may_interrupt {
            if let Some(handle) = self.join_handle.lock().unwrap().take() {
                handle.abort();
            }
        }

        if !self.state.terminal_fired.swap(true, Ordering::SeqCst) {
            self.delegate.on_cancelled(None);
        } else {
            debug!("cancel after terminal callback, nothing to deliver");
        }
    }
}
