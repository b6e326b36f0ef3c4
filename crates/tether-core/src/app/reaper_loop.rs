//! ReaperLoop - 死んだ lease の回収
//!
//! # フロー
//! 1. 全 lease 行を読み、heartbeat の最終変化時刻を手元に記録する
//! 2. reap 閾値以上 heartbeat が動いていない lease を「死亡」とみなす
//! 3. 死んだ lease ごとに reap タスクを投入する（`reap/<leaseId>` ロックで直列化）
//! 4. reap タスクが lease 行を消し、所有タスクを QUEUED に戻し、保持ロックを解放する
//!
//! 判定は各参加者のローカル時計で「変化が観測されなかった時間」を測るので、
//! 参加者間の時計のずれに影響されない。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::scheduler::Shared;
use crate::domain::{EntityType, LeaseId, LeaseRecord, LockId, OwnerRef, TaskBuilder, TaskId};
use crate::error::{HandlerError, SchedulerError};
use crate::handler::{HandlerResult, TaskContext, TaskHandler};

/// Entity type of the built-in task that cleans up after a dead lease.
pub const REAP_ENTITY_TYPE: &str = "tether.reap_lease";

pub(crate) async fn run(shared: Arc<Shared>, token: CancellationToken) {
    let mut reaper = Reaper::new(shared.config.reap_threshold());
    let mut ticker = tokio::time::interval(shared.config.reap_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(err) = reaper.sweep(&shared).await {
            error!(error = %err, "reaper sweep failed");
        }
    }
    debug!("reaper loop stopped");
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    heartbeat: i64,
    since: Instant,
}

/// Tracks when each lease's heartbeat last moved, as seen from here.
#[derive(Debug)]
pub(crate) struct Reaper {
    threshold: Duration,
    observed: HashMap<LeaseId, Observation>,
}

impl Reaper {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            observed: HashMap::new(),
        }
    }

    /// Fold a fresh read of every lease row into the observations and return
    /// the leases whose heartbeat has not moved for at least the threshold.
    pub(crate) fn observe(&mut self, leases: &[LeaseRecord], now: Instant) -> Vec<LeaseId> {
        let mut next = HashMap::with_capacity(leases.len());
        let mut dead = Vec::new();
        for lease in leases {
            let observation = match self.observed.get(&lease.lease_id) {
                Some(seen) if seen.heartbeat == lease.heartbeat => *seen,
                _ => Observation {
                    heartbeat: lease.heartbeat,
                    since: now,
                },
            };
            if now.duration_since(observation.since) >= self.threshold {
                dead.push(lease.lease_id);
            }
            next.insert(lease.lease_id, observation);
        }
        self.observed = next;
        dead
    }

    pub(crate) async fn sweep(&mut self, shared: &Arc<Shared>) -> Result<Vec<LeaseId>, SchedulerError> {
        let leases = shared.leases.repo().all().await?;
        let dead = self.observe(&leases, Instant::now());
        for &lease_id in &dead {
            enqueue_reap(shared, lease_id).await?;
        }
        Ok(dead)
    }
}

/// Add a reap task for `lease_id` unless one is already pending.
async fn enqueue_reap(shared: &Arc<Shared>, lease_id: LeaseId) -> Result<(), SchedulerError> {
    let entity_type = EntityType::new(REAP_ENTITY_TYPE);
    let existing = shared.tasks.find_by_entity(&entity_type, &lease_id.key()).await?;
    if existing.iter().any(|task| !task.is_terminal()) {
        debug!(lease_id = %lease_id, "reap already pending");
        return Ok(());
    }
    warn!(lease_id = %lease_id, "lease stopped heartbeating; scheduling reap");
    let task = TaskBuilder::new(entity_type, lease_id.key())
        .lock_id(format!("reap/{}", lease_id.key()))
        .build();
    shared.submit(task).await?;
    Ok(())
}

/// Delete `dead`'s row, hand its tasks back to the queue and free its locks.
/// Returns every task that was requeued or woken. Safe to repeat.
pub(crate) async fn release_lease(shared: &Arc<Shared>, dead: LeaseId) -> Result<Vec<TaskId>, SchedulerError> {
    shared.leases.repo().delete(dead).await?;
    let mut touched = Vec::new();

    let mut after = None;
    loop {
        let (tasks, next) = shared.tasks.owned_by(OwnerRef::Lease(dead), after).await?;
        for task in tasks {
            match shared.tasks.requeue_orphan(task.task_id, dead).await {
                Ok(_) => {
                    info!(task_id = %task.task_id, lease_id = %dead, "orphaned task requeued");
                    touched.push(task.task_id);
                }
                Err(SchedulerError::Conflict(_)) => {
                    debug!(task_id = %task.task_id, "orphan already moved on");
                }
                Err(err) => return Err(err),
            }
        }
        match next {
            Some(marker) => after = Some(marker),
            None => break,
        }
    }

    let mut after = None;
    loop {
        let (rows, next) = shared.locks.held_by(dead, after).await?;
        for row in rows {
            let Some(running) = row.running_task_id else {
                continue;
            };
            let lock = LockId::from_key(&row.lock_id);
            if let Some(woken) = shared.coordinator.release_one(&lock, running, dead).await? {
                touched.push(woken);
            }
            debug!(lock_id = %lock, task_id = %running, lease_id = %dead, "lock force-released");
        }
        match next {
            Some(marker) => after = Some(marker),
            None => break,
        }
    }

    for &task_id in &touched {
        shared.dispatch_jittered(task_id);
    }
    info!(lease_id = %dead, touched = touched.len(), "lease released");
    Ok(touched)
}

/// Runs the cleanup for the lease named by the task's entity id.
pub(crate) struct ReapHandler {
    shared: Weak<Shared>,
}

impl ReapHandler {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl TaskHandler for ReapHandler {
    async fn run(&self, ctx: TaskContext) -> HandlerResult {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| HandlerError::new("scheduler has shut down"))?;
        let dead: LeaseId = ctx
            .task()
            .entity_id
            .parse()
            .map_err(|err| HandlerError::new(format!("not a lease id: {err}")))?;
        release_lease(&shared, dead)
            .await
            .map_err(|err| HandlerError::from_error(&err))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(heartbeat: i64) -> LeaseRecord {
        let mut lease = LeaseRecord::new(LeaseId::generate(), "node-a", "0.1.0");
        lease.heartbeat = heartbeat;
        lease
    }

    #[test]
    fn silent_lease_is_dead_after_threshold() {
        let mut reaper = Reaper::new(Duration::from_millis(100));
        let start = Instant::now();
        let lease = record(1);

        assert!(reaper.observe(&[lease.clone()], start).is_empty());
        assert!(reaper.observe(&[lease.clone()], start + Duration::from_millis(99)).is_empty());
        assert_eq!(
            reaper.observe(&[lease.clone()], start + Duration::from_millis(100)),
            vec![lease.lease_id]
        );
    }

    #[test]
    fn heartbeat_change_resets_the_clock() {
        let mut reaper = Reaper::new(Duration::from_millis(100));
        let start = Instant::now();
        let mut lease = record(1);

        reaper.observe(&[lease.clone()], start);
        lease.heartbeat = 2;
        assert!(reaper.observe(&[lease.clone()], start + Duration::from_millis(150)).is_empty());
        assert!(reaper.observe(&[lease.clone()], start + Duration::from_millis(200)).is_empty());
        assert_eq!(
            reaper.observe(&[lease.clone()], start + Duration::from_millis(250)),
            vec![lease.lease_id]
        );
    }

    #[test]
    fn deleted_rows_are_forgotten() {
        let mut reaper = Reaper::new(Duration::from_millis(100));
        let start = Instant::now();
        let lease = record(1);

        reaper.observe(&[lease.clone()], start);
        reaper.observe(&[], start + Duration::from_millis(50));
        // 再出現したら観測し直し
        assert!(reaper.observe(&[lease], start + Duration::from_millis(200)).is_empty());
    }
}
