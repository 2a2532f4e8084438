//! Periodic schedule timer.
//!
//! Sleeps until the earliest due schedule, dispatches everything due, and
//! reacts to manual-trigger commands and shutdown in between. Dispatches run
//! as spawned tasks so a long batch never delays the other schedules.

use super::{DispatchReport, ScheduleDispatcher, Trigger};
use crate::schedule::ScheduleStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Commands accepted by the running timer.
pub enum TimerCommand {
    TriggerNow {
        schedule_id: i64,
        response: oneshot::Sender<DispatchReport>,
    },
}

/// Handle for interacting with the timer from the outside.
#[derive(Clone)]
pub struct TimerHandle {
    command_tx: mpsc::Sender<TimerCommand>,
}

impl TimerHandle {
    /// Trigger a schedule immediately, bypassing its due time.
    pub async fn trigger_now(&self, schedule_id: i64) -> Option<DispatchReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(TimerCommand::TriggerNow {
                schedule_id,
                response: response_tx,
            })
            .await
            .ok()?;
        response_rx.await.ok()
    }
}

/// Timer loop driving periodic dispatches.
pub struct ScheduleTimer {
    schedules: Arc<dyn ScheduleStore>,
    dispatcher: Arc<ScheduleDispatcher>,
    command_rx: mpsc::Receiver<TimerCommand>,
    shutdown: CancellationToken,
    /// Upper bound on one sleep, so newly added schedules are noticed.
    check_interval: Duration,
    repeat_count: u32,
}

impl ScheduleTimer {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        dispatcher: Arc<ScheduleDispatcher>,
        shutdown: CancellationToken,
        check_interval: Duration,
        repeat_count: u32,
    ) -> (Self, TimerHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        (
            Self {
                schedules,
                dispatcher,
                command_rx,
                shutdown,
                check_interval,
                repeat_count,
            },
            TimerHandle { command_tx },
        )
    }

    /// Main timer loop.
    pub async fn run(mut self) {
        info!("Schedule timer starting");
        loop {
            let sleep_duration = self.time_until_next_due();
            debug!("Timer sleeping for {:?}", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.dispatch_due();
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }
                _ = self.shutdown.cancelled() => {
                    info!("Schedule timer received shutdown signal");
                    break;
                }
            }
        }
        info!("Schedule timer stopped");
    }

    fn handle_command(&self, command: TimerCommand) {
        match command {
            TimerCommand::TriggerNow {
                schedule_id,
                response,
            } => {
                let dispatcher = Arc::clone(&self.dispatcher);
                let repeat_count = self.repeat_count;
                tokio::spawn(async move {
                    let report = dispatcher
                        .run(schedule_id, Trigger::Manual, repeat_count)
                        .await;
                    let _ = response.send(report);
                });
            }
        }
    }

    fn time_until_next_due(&self) -> Duration {
        let now = Utc::now();
        let fake_minutes = self.dispatcher.settings().fake_schedule_minutes;
        let mut min_duration = self.check_interval;

        let schedules = match self.schedules.get_all() {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Failed to load schedules: {}", e);
                return min_duration;
            }
        };
        for schedule in schedules {
            if !schedule.enabled || self.dispatcher.guard().is_running(schedule.id) {
                continue;
            }
            let next = schedule.next_run_after(now, fake_minutes);
            let until = (next - now)
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            if until < min_duration {
                min_duration = until;
            }
        }
        min_duration
    }

    fn dispatch_due(&self) {
        let now = Utc::now();
        let fake_minutes = self.dispatcher.settings().fake_schedule_minutes;
        let schedules = match self.schedules.get_all() {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Failed to load schedules: {}", e);
                return;
            }
        };
        // due within the next second: the sleep above targeted this instant
        let slack = chrono::Duration::seconds(1);
        for schedule in schedules {
            if !schedule.enabled || self.dispatcher.guard().is_running(schedule.id) {
                continue;
            }
            if schedule.next_run_after(now - slack, fake_minutes) <= now {
                info!("[{}] schedule due, dispatching", schedule.id);
                let dispatcher = Arc::clone(&self.dispatcher);
                let repeat_count = self.repeat_count;
                let id = schedule.id;
                tokio::spawn(async move {
                    dispatcher.run(id, Trigger::Periodic, repeat_count).await;
                });
            }
        }
    }
}
