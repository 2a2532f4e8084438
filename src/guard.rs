//! Duplicate-run rejection keyed by schedule id.
//!
//! Triggers arrive from independent sources (the periodic timer, a manual
//! "run now", repeated test invocations) and must collapse to at most one
//! active run per schedule. The registry is process-scoped and in-memory: a
//! restart clears it, there is no timeout and no persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Tracks which schedules are currently running, with atomic begin
/// semantics. Check-and-mark happens under a single lock so two concurrent
/// `begin` calls for the same id can never both succeed.
#[derive(Default)]
pub struct RunGuard {
    running: Mutex<HashMap<i64, ()>>,
}

impl RunGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark `id` as running. Returns `None` if it already is — the expected
    /// outcome of a duplicate trigger, not an error. The returned token ends
    /// the run when dropped, so begin/end stay paired on every exit path.
    pub fn begin(self: &Arc<Self>, id: i64) -> Option<RunToken> {
        let mut running = self.running.lock().unwrap();
        if running.contains_key(&id) {
            warn!("[{}] duplicate schedule detected (as designed, ignored)", id);
            return None;
        }
        running.insert(id, ());
        Some(RunToken {
            guard: Arc::clone(self),
            id,
        })
    }

    pub fn is_running(&self, id: i64) -> bool {
        self.running.lock().unwrap().contains_key(&id)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    fn end(&self, id: i64) {
        let mut running = self.running.lock().unwrap();
        if running.remove(&id).is_none() {
            debug!("[{}] duplicate schedule end (late, ignored)", id);
        }
    }
}

/// Scoped marker for one active schedule run.
pub struct RunToken {
    guard: Arc<RunGuard>,
    id: i64,
}

impl RunToken {
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.guard.end(self.id);
    }
}
