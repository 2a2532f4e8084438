use anyhow::{Context, Result};
use backup_scheduler::config::{AppConfig, CliConfig, FileConfig};
use backup_scheduler::dispatch::{DispatcherSettings, ScheduleDispatcher, ScheduleTimer};
use backup_scheduler::guard::RunGuard;
use backup_scheduler::keepalive::{KeepAlive, NoopHostHold};
use backup_scheduler::metrics;
use backup_scheduler::notify::LogReportSink;
use backup_scheduler::packages::{FsBackupRoot, JsonFilePackageSource};
use backup_scheduler::schedule::SqliteScheduleStore;
use backup_scheduler::work::{
    CommandJobRunner, LocalWorkQueue, LoggingJobRunner, PackageJobRunner,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite scheduler database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to the installed-package inventory (JSON).
    #[clap(long, value_parser = parse_path)]
    pub inventory_path: Option<PathBuf>,

    /// Backup storage directory. Runs abort when it is missing.
    #[clap(long, value_parser = parse_path)]
    pub backup_dir: Option<PathBuf>,

    /// External command invoked per package as:
    /// <command> <package> <mode> <direction>. Dry-run when omitted.
    #[clap(long)]
    pub backup_command: Option<String>,

    /// Maximum number of per-package jobs running at once.
    #[clap(long, default_value_t = 4)]
    pub max_concurrent_jobs: usize,

    /// Day threshold for the "old backups" filter.
    #[clap(long, default_value_t = 30)]
    pub old_backup_days: i64,

    /// Upper bound in seconds on one timer sleep.
    #[clap(long, default_value_t = 60)]
    pub check_interval_secs: u64,

    /// Path to an optional TOML config file; its values override the CLI.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path,
        inventory_path: cli_args.inventory_path,
        backup_dir: cli_args.backup_dir,
        backup_command: cli_args.backup_command,
        max_concurrent_jobs: cli_args.max_concurrent_jobs,
        old_backup_days: cli_args.old_backup_days,
        check_interval_secs: cli_args.check_interval_secs,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening scheduler database at {:?}...", config.db_path);
    let store = Arc::new(SqliteScheduleStore::new(&config.db_path)?);

    let runner: Arc<dyn PackageJobRunner> = match &config.backup_command {
        Some(command) => {
            info!("Backup command configured: {}", command);
            Arc::new(CommandJobRunner::new(command.clone()))
        }
        None => {
            info!("No backup command configured, running dry");
            Arc::new(LoggingJobRunner)
        }
    };
    let queue = LocalWorkQueue::new(runner, config.max_concurrent_jobs);

    let dispatcher = Arc::new(ScheduleDispatcher::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(JsonFilePackageSource::new(config.inventory_path.clone())),
        Arc::new(FsBackupRoot::new(config.backup_dir.clone())),
        queue,
        RunGuard::new(),
        KeepAlive::new(Arc::new(NoopHostHold)),
        Arc::new(LogReportSink),
        DispatcherSettings {
            old_backup_days: config.old_backup_days,
            fake_schedule_minutes: config.fake_schedule_minutes,
        },
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .context("Failed to install shutdown handler")?;
    }

    let (timer, _handle) = ScheduleTimer::new(
        store,
        dispatcher,
        shutdown,
        Duration::from_secs(config.check_interval_secs),
        config.fake_schedule_dups,
    );

    info!("Schedule timer ready");
    timer.run().await;
    Ok(())
}
