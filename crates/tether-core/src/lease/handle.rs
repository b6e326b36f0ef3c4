use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::domain::LeaseId;
use crate::error::SchedulerError;

/// In-process view of one lease.
///
/// Cloning is cheap; every clone observes the same failure flag and the same
/// cancellation token. Once failed, a handle never becomes valid again.
#[derive(Clone)]
pub struct LeaseHandle {
    inner: Arc<Inner>,
}

struct Inner {
    lease_id: LeaseId,
    /// Cancelled on failure or shutdown: interrupts tracked work, stops renewal.
    token: CancellationToken,
    tracker: TaskTracker,
    failed: AtomicBool,
    created: Instant,
    /// Milliseconds after `created` of the last successful renewal.
    last_renewal_ms: AtomicU64,
    heartbeat: AtomicI64,
    reap_threshold: Duration,
}

impl LeaseHandle {
    pub(crate) fn new(lease_id: LeaseId, reap_threshold: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lease_id,
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                failed: AtomicBool::new(false),
                created: Instant::now(),
                last_renewal_ms: AtomicU64::new(0),
                heartbeat: AtomicI64::new(1),
                reap_threshold,
            }),
        }
    }

    pub fn lease_id(&self) -> LeaseId {
        self.inner.lease_id
    }

    /// Last persisted heartbeat value this process wrote.
    pub fn heartbeat(&self) -> i64 {
        self.inner.heartbeat.load(Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    /// False once failed, or once renewal has lapsed past the reap threshold
    /// (in which case the handle fails itself).
    pub fn is_still_valid(&self) -> bool {
        if self.is_failed() {
            return false;
        }
        if self.since_renewal() >= self.inner.reap_threshold {
            self.fail("no successful renewal within the reap threshold");
            return false;
        }
        true
    }

    pub fn ensure_valid(&self) -> Result<(), SchedulerError> {
        if self.is_still_valid() {
            Ok(())
        } else {
            Err(SchedulerError::LostLease(self.inner.lease_id))
        }
    }

    /// Token handed to handlers. It fires when the lease fails; cancelling it
    /// from the handler side does not affect the lease.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub(crate) fn record_renewal(&self, heartbeat: i64) {
        let now = u64::try_from(self.inner.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.inner.last_renewal_ms.store(now, Ordering::SeqCst);
        self.inner.heartbeat.store(heartbeat, Ordering::SeqCst);
    }

    /// Mark the lease failed and interrupt everything running under it.
    pub(crate) fn fail(&self, reason: &str) {
        if !self.inner.failed.swap(true, Ordering::SeqCst) {
            warn!(lease_id = %self.inner.lease_id, reason, "lease failed");
        }
        self.inner.token.cancel();
    }

    /// Stop using the lease on purpose (shutdown). Same effect as `fail`, no warning.
    pub(crate) fn retire(&self) {
        self.inner.failed.store(true, Ordering::SeqCst);
        self.inner.token.cancel();
    }

    fn since_renewal(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_renewal_ms.load(Ordering::SeqCst));
        self.inner.created.elapsed().saturating_sub(last)
    }
}

impl std::fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("lease_id", &self.inner.lease_id)
            .field("failed", &self.is_failed())
            .field("heartbeat", &self.heartbeat())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_itself_after_threshold_without_renewal() {
        let handle = LeaseHandle::new(LeaseId::generate(), Duration::from_millis(40));
        assert!(handle.is_still_valid());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_still_valid());
        assert!(handle.is_failed());
        assert!(handle.token().is_cancelled());
        assert!(matches!(handle.ensure_valid(), Err(SchedulerError::LostLease(_))));
    }

    #[tokio::test]
    async fn renewal_pushes_the_deadline_out() {
        let handle = LeaseHandle::new(LeaseId::generate(), Duration::from_millis(60));
        for heartbeat in 2..6 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            handle.record_renewal(heartbeat);
        }
        assert!(handle.is_still_valid());
        assert_eq!(handle.heartbeat(), 5);
    }

    #[test]
    fn handler_side_cancel_does_not_fail_the_lease() {
        let handle = LeaseHandle::new(LeaseId::generate(), Duration::from_secs(60));
        let child = handle.cancellation_token();
        child.cancel();

        assert!(!handle.is_failed());
        assert!(!handle.token().is_cancelled());

        handle.fail("test");
        assert!(handle.cancellation_token().is_cancelled());
    }
}
