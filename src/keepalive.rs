//! Process keep-alive with nesting semantics.
//!
//! While any batch is in flight the host process must be kept alive. The
//! underlying hold is acquired once on the first acquire (0 -> 1) and
//! released once when the count returns to zero, however the acquire and
//! release calls interleave.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The real resource being held (a wake lock, an inhibit handle, ...).
pub trait HostHold: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// No-op hold for embedders without a real resource to pin.
pub struct NoopHostHold;

impl HostHold for NoopHostHold {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Counted wrapper around a [`HostHold`].
pub struct KeepAlive {
    nested: AtomicI32,
    hold: Arc<dyn HostHold>,
}

impl KeepAlive {
    pub fn new(hold: Arc<dyn HostHold>) -> Arc<Self> {
        Arc::new(Self {
            nested: AtomicI32::new(0),
            hold,
        })
    }

    /// Scoped acquire; the hold is released when the guard drops.
    pub fn acquire(self: &Arc<Self>) -> KeepAliveGuard {
        let before = self.nested.fetch_add(1, Ordering::SeqCst);
        debug!("keep-alive acquire (before: {})", before);
        if before == 0 {
            self.hold.acquire();
        }
        KeepAliveGuard {
            keep_alive: Arc::clone(self),
        }
    }

    pub fn nesting_level(&self) -> i32 {
        self.nested.load(Ordering::SeqCst)
    }

    fn release(&self) {
        let before = self.nested.fetch_sub(1, Ordering::SeqCst);
        debug!("keep-alive release (before: {})", before);
        if before == 1 {
            self.hold.release();
        } else if before <= 0 {
            warn!("keep-alive release without matching acquire");
        }
    }
}

/// Drop guard pairing every acquire with exactly one release.
pub struct KeepAliveGuard {
    keep_alive: Arc<KeepAlive>,
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.keep_alive.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

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

    #[test]
    fn test_nested_acquires_hold_underlying_once() {
        let hold = Arc::new(CountingHold::default());
        let keep_alive = KeepAlive::new(hold.clone());

        let a = keep_alive.acquire();
        let b = keep_alive.acquire();
        let c = keep_alive.acquire();
        assert_eq!(hold.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(keep_alive.nesting_level(), 3);

        drop(b);
        drop(a);
        assert_eq!(hold.releases.load(Ordering::SeqCst), 0);
        drop(c);
        assert_eq!(hold.releases.load(Ordering::SeqCst), 1);
        assert_eq!(keep_alive.nesting_level(), 0);
    }

    #[test]
    fn test_reacquire_after_full_release() {
        let hold = Arc::new(CountingHold::default());
        let keep_alive = KeepAlive::new(hold.clone());

        drop(keep_alive.acquire());
        drop(keep_alive.acquire());
        assert_eq!(hold.acquires.load(Ordering::SeqCst), 2);
        assert_eq!(hold.releases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interleaved_from_many_tasks() {
        let hold = Arc::new(CountingHold::default());
        let keep_alive = KeepAlive::new(hold.clone());

        let outer = keep_alive.acquire();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let keep_alive = Arc::clone(&keep_alive);
            handles.push(tokio::spawn(async move {
                let _guard = keep_alive.acquire();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(outer);

        assert_eq!(hold.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(hold.releases.load(Ordering::SeqCst), 1);
        assert_eq!(keep_alive.nesting_level(), 0);
    }
}
