//! End-to-end dispatch scenarios against the real dispatcher, guard,
//! sqlite store and local work queue.

use anyhow::Result;
use backup_scheduler::dispatch::{
    DispatchStatus, DispatcherSettings, ScheduleDispatcher, Trigger,
};
use backup_scheduler::guard::RunGuard;
use backup_scheduler::keepalive::{HostHold, KeepAlive};
use backup_scheduler::notify::ReportSink;
use backup_scheduler::packages::{
    BackupRoot, LocationError, Package, PackageSource, MAIN_FILTER_USER,
};
use backup_scheduler::schedule::{Schedule, ScheduleStore, SqliteScheduleStore};
use backup_scheduler::work::{LocalWorkQueue, PackageJobRunner, WorkCompletion, WorkItem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FixedPackageSource {
    packages: Vec<Package>,
}

impl PackageSource for FixedPackageSource {
    fn list_installed(&self) -> Result<Vec<Package>> {
        Ok(self.packages.clone())
    }
}

struct OkBackupRoot;

impl BackupRoot for OkBackupRoot {
    fn ensure_accessible(&self) -> Result<(), LocationError> {
        Ok(())
    }
}

struct NullSink;

impl ReportSink for NullSink {
    fn report_failure(&self, _message: &str) {}
    fn show_progress(&self, _stage: &str, _message: &str, _percent: u8) {}
}

#[derive(Default)]
struct CountingHold {
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl HostHold for CountingHold {
    fn acquire(&self) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
    }
    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Runner scripted per package name: delay, then succeed or fail.
struct ScriptedRunner {
    delay: Duration,
    failures: Mutex<Vec<(String, String)>>,
    runs: AtomicUsize,
}

impl ScriptedRunner {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            failures: Mutex::new(Vec::new()),
            runs: AtomicUsize::new(0),
        }
    }

    fn fail(&self, package: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((package.to_string(), error.to_string()));
    }
}

impl PackageJobRunner for ScriptedRunner {
    fn run(&self, item: &WorkItem) -> WorkCompletion {
        std::thread::sleep(self.delay);
        self.runs.fetch_add(1, Ordering::SeqCst);
        let failures = self.failures.lock().unwrap();
        match failures.iter().find(|(name, _)| name == &item.package_name) {
            Some((_, error)) => WorkCompletion::failed(&item.package_name, error),
            None => WorkCompletion::succeeded(&item.package_name),
        }
    }
}

fn package(name: &str, label: &str) -> Package {
    Package {
        package_name: name.to_string(),
        package_label: label.to_string(),
        is_system: false,
        is_special: false,
        is_installed: true,
        is_disabled: false,
        is_updated: false,
        is_new: false,
        is_launchable: true,
        latest_backup: None,
    }
}

struct TestEnv {
    store: Arc<SqliteScheduleStore>,
    runner: Arc<ScriptedRunner>,
    hold: Arc<CountingHold>,
    dispatcher: Arc<ScheduleDispatcher>,
}

fn build_env(packages: Vec<Package>, job_delay: Duration) -> TestEnv {
    let store = Arc::new(SqliteScheduleStore::in_memory().unwrap());
    let runner = Arc::new(ScriptedRunner::new(job_delay));
    let hold = Arc::new(CountingHold::default());
    let dispatcher = Arc::new(ScheduleDispatcher::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(FixedPackageSource { packages }),
        Arc::new(OkBackupRoot),
        LocalWorkQueue::new(runner.clone(), 4),
        RunGuard::new(),
        KeepAlive::new(hold.clone()),
        Arc::new(NullSink),
        DispatcherSettings::default(),
    ));
    TestEnv {
        store,
        runner,
        hold,
        dispatcher,
    }
}

fn user_schedule(name: &str) -> Schedule {
    let mut schedule = Schedule::new(name);
    schedule.enabled = true;
    schedule.main_filter = MAIN_FILTER_USER;
    schedule
}

#[tokio::test]
async fn test_user_filter_scenario_selects_only_user_package() {
    let mut system = package("com.android.b", "B System");
    system.is_system = true;
    let mut special = package("special.c", "C Special");
    special.is_special = true;
    let env = build_env(
        vec![package("org.user.a", "A User"), system, special],
        Duration::ZERO,
    );
    let id = env.store.insert(&user_schedule("user apps")).unwrap();

    let report = env.dispatcher.run(id, Trigger::Manual, 0).await;

    assert_eq!(report.status, DispatchStatus::Completed);
    let batch = report.batch.unwrap();
    assert_eq!(batch.queued, 1);
    assert_eq!(batch.finished, 1);
    assert!(batch.all_succeeded);
}

#[tokio::test]
async fn test_partial_failure_aggregation() {
    let env = build_env(
        vec![
            package("pkg1", "Pkg 1"),
            package("pkg2", "Pkg 2"),
            package("pkg3", "Pkg 3"),
        ],
        Duration::ZERO,
    );
    env.runner.fail("pkg2", "disk full");
    let id = env.store.insert(&user_schedule("three apps")).unwrap();

    let report = env.dispatcher.run(id, Trigger::Manual, 0).await;

    let batch = report.batch.unwrap();
    assert_eq!(batch.queued, 3);
    assert_eq!(batch.finished, 3);
    assert!(!batch.all_succeeded);
    assert_eq!(
        batch.errors,
        vec![("pkg2".to_string(), "disk full".to_string())]
    );
    // the two siblings still ran to completion
    assert_eq!(env.runner.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_dispatch_second_is_duplicate() {
    let env = build_env(vec![package("org.a", "Alpha")], Duration::from_millis(300));
    let id = env.store.insert(&user_schedule("slow")).unwrap();

    let first = {
        let dispatcher = Arc::clone(&env.dispatcher);
        tokio::spawn(async move { dispatcher.run(id, Trigger::Manual, 0).await })
    };
    // let the first invocation claim the guard before racing the second
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = env.dispatcher.run(id, Trigger::Manual, 0).await;
    let first = first.await.unwrap();

    assert_eq!(first.status, DispatchStatus::Completed);
    assert_eq!(second.status, DispatchStatus::DuplicateRun);
    assert!(second.batch.is_none());
    assert_eq!(env.runner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_keep_alive_held_exactly_once_per_dispatch() {
    let env = build_env(vec![package("org.a", "Alpha")], Duration::ZERO);
    let id = env.store.insert(&user_schedule("daily")).unwrap();

    env.dispatcher.run(id, Trigger::Manual, 0).await;
    env.dispatcher.run(id, Trigger::Manual, 0).await;

    assert_eq!(env.hold.acquires.load(Ordering::SeqCst), 2);
    assert_eq!(env.hold.releases.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fake_duplicate_knob_repeats_cycles() {
    let env = build_env(vec![package("org.a", "Alpha")], Duration::ZERO);
    let id = env.store.insert(&user_schedule("repeated")).unwrap();

    let report = env.dispatcher.run(id, Trigger::Manual, 2).await;

    assert_eq!(report.status, DispatchStatus::Completed);
    // 1 + repeat_count full dispatch cycles, each begin/end paired
    assert_eq!(env.runner.runs.load(Ordering::SeqCst), 3);
    assert!(!env.dispatcher.guard().is_running(id));
}

#[tokio::test]
async fn test_runs_of_different_schedules_proceed_concurrently() {
    let env = build_env(vec![package("org.a", "Alpha")], Duration::from_millis(150));
    let first_id = env.store.insert(&user_schedule("one")).unwrap();
    let second_id = env.store.insert(&user_schedule("two")).unwrap();

    let first = {
        let dispatcher = Arc::clone(&env.dispatcher);
        tokio::spawn(async move { dispatcher.run(first_id, Trigger::Manual, 0).await })
    };
    let second = {
        let dispatcher = Arc::clone(&env.dispatcher);
        tokio::spawn(async move { dispatcher.run(second_id, Trigger::Manual, 0).await })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_eq!(first.status, DispatchStatus::Completed);
    assert_eq!(second.status, DispatchStatus::Completed);
}
