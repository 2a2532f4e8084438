//! Fan-out/join of per-package work items for one schedule invocation.
//!
//! Every selected package becomes one uniquely-keyed work item. Completion
//! signals arrive in arbitrary order and are folded by a single aggregator
//! loop over one channel, so `finished` and the finalization check share one
//! consumer and cannot race.

use crate::metrics;
use crate::packages::Package;
use crate::schedule::Schedule;
use crate::work::{BackupDirection, SubmitPolicy, WorkCompletion, WorkItem, WorkQueue};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Aggregated result of one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub queued: usize,
    pub finished: usize,
    /// Package name and display-ready message, in arrival order.
    pub errors: Vec<(String, String)>,
    pub all_succeeded: bool,
}

impl BatchOutcome {
    pub fn no_work(batch_id: String) -> Self {
        Self {
            batch_id,
            queued: 0,
            finished: 0,
            errors: Vec::new(),
            all_succeeded: true,
        }
    }
}

/// Log-correlation id for one schedule invocation.
pub fn batch_name(schedule_name: &str, now: DateTime<Utc>) -> String {
    format!("{} @ {}", schedule_name, now.format("%Y-%m-%d %H:%M:%S"))
}

/// Submits one work item per package and joins on all completions.
pub struct WorkOrchestrator {
    queue: Arc<dyn WorkQueue>,
}

impl WorkOrchestrator {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }

    /// Run one batch to completion. A single item's failure never cancels
    /// its siblings; the batch completes once every queued item reported.
    pub async fn run_batch(
        &self,
        schedule: &Schedule,
        packages: &[Package],
        direction: BackupDirection,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let batch_id = batch_name(&schedule.name, now);
        if packages.is_empty() {
            debug!("[{}] nothing to fan out", batch_id);
            return Ok(BatchOutcome::no_work(batch_id));
        }

        let notification_id = now.timestamp() as i32;
        let queued = packages.len();
        info!("[{}] queueing {} work items", batch_id, queued);
        let started = Instant::now();

        // Submit everything first, then join. Completion signals are
        // forwarded into one channel as (item index, completion) tuples.
        let (completion_tx, mut completion_rx) = mpsc::channel::<(usize, WorkCompletion)>(queued);
        for (index, package) in packages.iter().enumerate() {
            let item = WorkItem {
                package_name: package.package_name.clone(),
                mode: schedule.mode,
                direction,
                batch_id: batch_id.clone(),
                notification_id,
            };
            let key = format!("schedule_{}_{}", schedule.id, package.package_name);
            let mut handle = match self
                .queue
                .submit_unique(&key, SubmitPolicy::Replace, item)
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("[{}] submit failed for {}: {}", batch_id, package.package_name, e);
                    let mut outcome = BatchOutcome::no_work(batch_id);
                    outcome.queued = queued;
                    outcome.all_succeeded = false;
                    outcome
                        .errors
                        .push((package.package_name.clone(), e.to_string()));
                    return Ok(outcome);
                }
            };

            let tx = completion_tx.clone();
            tokio::spawn(async move {
                while let Some(completion) = handle.next_completion().await {
                    if tx.send((index, completion)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(completion_tx);

        let mut outcome = BatchOutcome {
            batch_id: batch_id.clone(),
            queued,
            finished: 0,
            errors: Vec::new(),
            all_succeeded: true,
        };
        let mut terminal = vec![false; queued];

        while outcome.finished < queued {
            let (index, completion) = match completion_rx.recv().await {
                Some(signal) => signal,
                None => {
                    warn!(
                        "[{}] completion channel closed after {}/{} items",
                        batch_id, outcome.finished, queued
                    );
                    outcome.all_succeeded = false;
                    break;
                }
            };
            if terminal[index] {
                // re-delivered signal for an already-terminal item
                debug!("[{}] ignoring duplicate completion for item {}", batch_id, index);
                continue;
            }
            terminal[index] = true;
            outcome.finished += 1;
            metrics::record_batch_item(completion.succeeded);
            if let Some(error) = &completion.error {
                outcome
                    .errors
                    .push((completion.package_name.clone(), error.clone()));
            }
            outcome.all_succeeded = outcome.all_succeeded && completion.succeeded;
        }

        // finalize exactly once: the aggregator loop above is the only
        // consumer, so this point is reached a single time per batch
        metrics::record_batch_duration(started.elapsed());
        info!(
            "[{}] batch finished: {}/{} items, {} errors, all_succeeded={}",
            batch_id,
            outcome.finished,
            outcome.queued,
            outcome.errors.len(),
            outcome.all_succeeded
        );
        Ok(outcome)
    }
}
