//! Lease Manager - 参加者プロセスの生存証明
//!
//! # 役割
//! - 初回利用時に lease 行（heartbeat = 1）を作成する
//! - heartbeat 間隔ごとに「行がまだ存在すること」を条件に heartbeat を +1 する
//! - 更新に失敗した（= reaper に削除された）、または reap threshold を超えて
//!   更新できていない lease は failed になり、その下で動いている処理を中断する
//! - failed になった lease は二度と書き込みに使わない。次の `acquire_lease` で
//!   古い lease を drain してから新しい ID で作り直す
//!
//! lease の失敗は呼び出し側にエラーとしては返さない。Scheduler が事後に
//! 検出して、そのタスクを reaper に任せる。

mod handle;

pub use handle::LeaseHandle;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::domain::{LeaseId, LeaseRecord};
use crate::error::SchedulerError;
use crate::repo::LeaseRepo;

/// Result of shutting down the active lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseShutdown {
    pub lease_id: LeaseId,
    /// Everything tracked under the lease finished within the reap threshold.
    pub drained: bool,
}

pub struct LeaseManager {
    leases: LeaseRepo,
    node_identity: String,
    version: String,
    heartbeat_interval: Duration,
    reap_threshold: Duration,
    active: Mutex<Option<LeaseHandle>>,
    closed: AtomicBool,
}

impl LeaseManager {
    pub fn new(leases: LeaseRepo, config: &SchedulerConfig) -> Self {
        Self {
            leases,
            node_identity: config.node_identity.clone(),
            version: config.version.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            reap_threshold: config.reap_threshold(),
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn repo(&self) -> &LeaseRepo {
        &self.leases
    }

    /// The process's valid lease, created on first use or after a failure.
    ///
    /// Replacing a failed lease waits (bounded by the reap threshold) for work
    /// still running under it, which blocks new work in the meantime.
    pub async fn acquire_lease(&self) -> Result<LeaseHandle, SchedulerError> {
        let mut active = self.active.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }
        if let Some(handle) = active.as_ref()
            && handle.is_still_valid()
        {
            return Ok(handle.clone());
        }

        if let Some(old) = active.take() {
            old.fail("superseded by a new lease");
            if !self.drain(&old).await {
                warn!(lease_id = %old.lease_id(), "abandoning failed lease with work still running");
            }
        }

        let handle = self.create().await?;
        *active = Some(handle.clone());
        Ok(handle)
    }

    /// Allow leases to be created again after `shutdown`.
    pub(crate) fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_still_valid(&self, handle: &LeaseHandle) -> bool {
        handle.is_still_valid()
    }

    /// The active lease, if one exists and is still valid. Never creates one.
    pub async fn current(&self) -> Option<LeaseHandle> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|handle| handle.is_still_valid())
            .cloned()
    }

    /// Run `fut` as work of `handle`. Returns `None` if the lease failed
    /// before `fut` finished; `fut` is dropped at that point.
    pub async fn run<F>(&self, handle: &LeaseHandle, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        let token = handle.token().clone();
        handle
            .tracker()
            .track_future(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    out = fut => Some(out),
                }
            })
            .await
    }

    /// Stop the active lease: interrupt its work and wait for it to finish.
    /// The row is left in place; the caller releases holdings and deletes it.
    pub async fn shutdown(&self) -> Option<LeaseShutdown> {
        let handle = {
            let mut active = self.active.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            active.take()?
        };
        handle.retire();
        let drained = self.drain(&handle).await;
        info!(lease_id = %handle.lease_id(), drained, "lease shut down");
        Some(LeaseShutdown {
            lease_id: handle.lease_id(),
            drained,
        })
    }

    /// Simulates the process dying: the lease stops renewing and its work is
    /// dropped, but nothing is written.
    #[cfg(test)]
    pub(crate) async fn crash(&self) {
        let taken = {
            let mut active = self.active.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            active.take()
        };
        if let Some(handle) = taken {
            handle.retire();
            let _ = self.drain(&handle).await;
        }
    }

    async fn drain(&self, handle: &LeaseHandle) -> bool {
        handle.tracker().close();
        tokio::time::timeout(self.reap_threshold, handle.tracker().wait())
            .await
            .is_ok()
    }

    async fn create(&self) -> Result<LeaseHandle, SchedulerError> {
        let record = LeaseRecord::new(LeaseId::generate(), &self.node_identity, &self.version);
        self.leases.insert(&record).await?;
        info!(lease_id = %record.lease_id, node = %record.node_identity, "lease created");

        let handle = LeaseHandle::new(record.lease_id, self.reap_threshold);
        self.spawn_renewal(handle.clone());
        Ok(handle)
    }

    fn spawn_renewal(&self, handle: LeaseHandle) {
        let leases = self.leases.clone();
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval の初回 tick は即時に返るので読み捨てる
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = handle.token().cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !handle.is_still_valid() {
                    break;
                }
                match leases.renew(handle.lease_id()).await {
                    Ok(heartbeat) => {
                        handle.record_renewal(heartbeat);
                        debug!(lease_id = %handle.lease_id(), heartbeat, "lease renewed");
                    }
                    Err(SchedulerError::LostLease(_)) => {
                        handle.fail("lease row was deleted");
                        break;
                    }
                    Err(err) => {
                        warn!(lease_id = %handle.lease_id(), error = %err, "lease renewal failed");
                    }
                }
            }
            debug!(lease_id = %handle.lease_id(), "lease renewal stopped");
        });
    }
}
