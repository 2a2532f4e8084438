//! Backup Scheduler Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod dispatch;
pub mod guard;
pub mod keepalive;
pub mod metrics;
pub mod notify;
pub mod packages;
pub mod refresh;
pub mod schedule;
pub mod tasks;
pub mod work;

// Re-export commonly used types for convenience
pub use dispatch::{DispatchReport, DispatchStatus, ScheduleDispatcher, Trigger};
pub use guard::RunGuard;
pub use keepalive::KeepAlive;
pub use schedule::{Schedule, ScheduleStore, SqliteScheduleStore};
pub use work::{LocalWorkQueue, WorkQueue};
