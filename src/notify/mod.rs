//! Failure/progress reporting seam.
//!
//! Rendering (notifications, UI) is an external concern; the core only
//! pushes display-ready messages through this trait.

use tracing::{info, warn};

/// Sink for user-facing failure and progress reports.
pub trait ReportSink: Send + Sync {
    /// A failure message suitable for direct display.
    fn report_failure(&self, message: &str);

    /// Progress of a long-running operation. `stage` is a short machine
    /// token (e.g. "scanning"), `percent` is 0..=100.
    fn show_progress(&self, stage: &str, message: &str, percent: u8);
}

/// Default sink writing reports to the log.
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn report_failure(&self, message: &str) {
        warn!("failure: {}", message);
    }

    fn show_progress(&self, stage: &str, message: &str, percent: u8) {
        info!("progress [{}] {}% {}", stage, percent, message);
    }
}

#[cfg(test)]
pub mod testing {
    use super::ReportSink;
    use std::sync::Mutex;

    /// Collects reports for assertions.
    #[derive(Default)]
    pub struct CollectingSink {
        pub failures: Mutex<Vec<String>>,
        pub progress: Mutex<Vec<(String, String, u8)>>,
    }

    impl ReportSink for CollectingSink {
        fn report_failure(&self, message: &str) {
            self.failures.lock().unwrap().push(message.to_string());
        }

        fn show_progress(&self, stage: &str, message: &str, percent: u8) {
            self.progress
                .lock()
                .unwrap()
                .push((stage.to_string(), message.to_string(), percent));
        }
    }
}
