//! Lock/Prerequisite Coordinator.
//!
//! A task's request set is its named locks, its own self-lock and the
//! self-locks of its prerequisites. Sets are always walked in `LockId` order,
//! and locks taken before a block stay held, so two tasks can never wait on
//! each other.
//!
//! Waking is two-phase: the coordinator moves a waiter WAITING_* → QUEUED in
//! the store and returns its id; the scheduler dispatches it locally.

use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{LeaseId, LockId, TaskId, TaskInfo, TaskState};
use crate::error::SchedulerError;
use crate::lease::LeaseHandle;
use crate::repo::{LockRepo, TaskRepo};

const RELEASE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedOn {
    Lock(LockId),
    Prerequisite(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireResult {
    pub acquired: Vec<LockId>,
    pub blocked_on: Option<BlockedOn>,
}

impl AcquireResult {
    pub fn is_acquired(&self) -> bool {
        self.blocked_on.is_none()
    }
}

/// Every lock `task` needs, in acquisition order.
pub fn request_set(task: &TaskInfo) -> Vec<LockId> {
    let mut set: BTreeSet<LockId> = task.lock_ids.iter().cloned().map(LockId::Named).collect();
    set.insert(LockId::SelfLock(task.task_id));
    set.extend(task.prerequisite_task_ids.iter().copied().map(LockId::SelfLock));
    set.into_iter().collect()
}

/// Outcome of looking for someone to hand a freed lock to.
enum WaiterScan {
    Woken(TaskId),
    /// The first live waiter will get to the lock on its own.
    Pending,
    Empty,
}

#[derive(Clone)]
pub struct LockCoordinator {
    locks: LockRepo,
    tasks: TaskRepo,
    max_release_attempts: u32,
}

impl LockCoordinator {
    pub fn new(locks: LockRepo, tasks: TaskRepo, max_release_attempts: u32) -> Self {
        Self {
            locks,
            tasks,
            max_release_attempts: max_release_attempts.max(1),
        }
    }

    pub async fn try_acquire_all(
        &self,
        task: &TaskInfo,
        lease: &LeaseHandle,
    ) -> Result<AcquireResult, SchedulerError> {
        let mut acquired = Vec::new();
        for lock in request_set(task) {
            lease.ensure_valid()?;
            self.locks.enqueue_waiter(&lock, task.task_id).await?;

            if let Some(prerequisite) = lock.self_task().filter(|p| *p != task.task_id)
                && !self.prerequisite_done(prerequisite).await?
            {
                debug!(task_id = %task.task_id, prerequisite = %prerequisite, "blocked on prerequisite");
                return Ok(AcquireResult {
                    acquired,
                    blocked_on: Some(BlockedOn::Prerequisite(prerequisite)),
                });
            }

            match self.locks.acquire(&lock, task.task_id, lease.lease_id()).await {
                Ok(_) => {
                    debug!(task_id = %task.task_id, lock_id = %lock, "lock acquired");
                    acquired.push(lock);
                }
                Err(SchedulerError::Conflict(_)) => {
                    self.locks.bump_generation(&lock).await?;
                    debug!(task_id = %task.task_id, lock_id = %lock, "blocked on lock");
                    return Ok(AcquireResult {
                        acquired,
                        blocked_on: Some(BlockedOn::Lock(lock)),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(AcquireResult {
            acquired,
            blocked_on: None,
        })
    }

    /// Release every lock in `lock_ids` (reverse order) held or awaited by
    /// `task_id` under `owner`. Store failures are retried per lock.
    /// Returns the tasks that were woken and now need a local dispatch.
    pub async fn release(
        &self,
        lock_ids: &[LockId],
        task_id: TaskId,
        owner: LeaseId,
    ) -> Result<Vec<TaskId>, SchedulerError> {
        let mut woken = Vec::new();
        for lock in lock_ids.iter().rev() {
            let mut attempt = 1;
            loop {
                match self.release_one(lock, task_id, owner).await {
                    Ok(next) => {
                        woken.extend(next);
                        break;
                    }
                    Err(SchedulerError::Store(err)) if attempt < self.max_release_attempts => {
                        warn!(lock_id = %lock, task_id = %task_id, attempt, error = %err, "release failed, retrying");
                        attempt += 1;
                        tokio::time::sleep(RELEASE_RETRY_BACKOFF).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(woken)
    }

    /// Free `lock` from `(owner, task_id)` and pass it on.
    pub async fn release_one(
        &self,
        lock: &LockId,
        task_id: TaskId,
        owner: LeaseId,
    ) -> Result<Option<TaskId>, SchedulerError> {
        self.locks.remove_waiter(lock, task_id).await?;

        let mut generation = match self.locks.clear_holder(lock, task_id, owner).await {
            Ok(row) => Some(row.generation),
            Err(SchedulerError::Conflict(_)) => match self.locks.holder(lock).await? {
                Some(row) if row.is_held() => return Ok(None),
                Some(row) => Some(row.generation),
                None => None,
            },
            Err(err) => return Err(err),
        };

        for _ in 0..self.max_release_attempts {
            match self.next_waiter(lock).await? {
                WaiterScan::Woken(next) => return Ok(Some(next)),
                WaiterScan::Pending => return Ok(None),
                WaiterScan::Empty => {}
            }
            let Some(observed) = generation else {
                return Ok(None);
            };
            match self.locks.delete_idle_holder(lock, observed).await {
                Ok(()) => {
                    debug!(lock_id = %lock, "idle lock removed");
                    return Ok(None);
                }
                Err(SchedulerError::Conflict(_)) => {
                    // 誰かが取得を試みた。holder を読み直して待ち行列を再走査する
                    match self.locks.holder(lock).await? {
                        Some(row) if row.is_held() => return Ok(None),
                        Some(row) => generation = Some(row.generation),
                        None => return Ok(None),
                    }
                }
                Err(err) => return Err(err),
            }
        }
        debug!(lock_id = %lock, "gave up removing contended idle lock");
        Ok(None)
    }

    /// Move the locks `task` still holds under an earlier lease to `lease`,
    /// so the releasing participant owns what it releases. Rows held for
    /// other tasks are left alone. Returns the locks that changed owner.
    pub async fn adopt_held(
        &self,
        task: &TaskInfo,
        lease: &LeaseHandle,
    ) -> Result<Vec<LockId>, SchedulerError> {
        let mut adopted = Vec::new();
        for lock in request_set(task) {
            let Some(row) = self.locks.holder(&lock).await? else {
                continue;
            };
            if row.running_task_id != Some(task.task_id) || row.owner == Some(lease.lease_id()) {
                continue;
            }
            lease.ensure_valid()?;
            match self.locks.acquire(&lock, task.task_id, lease.lease_id()).await {
                Ok(_) => {
                    debug!(task_id = %task.task_id, lock_id = %lock, from = ?row.owner, "lock adopted");
                    adopted.push(lock);
                }
                // 読んだ後に他のタスクへ渡った
                Err(SchedulerError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(adopted)
    }

    /// True if nobody holds `lock`.
    pub async fn is_free(&self, lock: &LockId) -> Result<bool, SchedulerError> {
        Ok(!self.locks.holder(lock).await?.is_some_and(|row| row.is_held()))
    }

    /// True if nothing in `task`'s request set currently stands in its way.
    /// Reads only; used to recover waiters whose wake-up was lost.
    pub async fn can_progress(&self, task: &TaskInfo) -> Result<bool, SchedulerError> {
        for lock in request_set(task) {
            if let Some(prerequisite) = lock.self_task().filter(|p| *p != task.task_id)
                && !self.prerequisite_done(prerequisite).await?
            {
                return Ok(false);
            }
            if let Some(row) = self.locks.holder(&lock).await?
                && row.is_held()
                && row.running_task_id != Some(task.task_id)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True if `task_id` is terminal, or gone (which is logged and tolerated).
    pub async fn prerequisite_done(&self, task_id: TaskId) -> Result<bool, SchedulerError> {
        match self.tasks.get(task_id).await? {
            Some(task) => Ok(task.is_terminal()),
            None => {
                warn!(task_id = %task_id, "prerequisite task does not exist; treating as done");
                Ok(true)
            }
        }
    }

    async fn next_waiter(&self, lock: &LockId) -> Result<WaiterScan, SchedulerError> {
        let mut after = None;
        loop {
            let (rows, next) = self.locks.waiters(lock, after).await?;
            for row in rows {
                let task = match self.tasks.get(row.task_id).await? {
                    Some(task) if !task.is_terminal() => task,
                    _ => {
                        debug!(lock_id = %lock, task_id = %row.task_id, "dropping stale waiter");
                        self.locks.remove_waiter(lock, row.task_id).await?;
                        continue;
                    }
                };
                let wakeable = matches!(
                    task.state,
                    TaskState::WaitingForLock | TaskState::WaitingForPrerequisite
                ) && task.is_unowned();
                if !wakeable {
                    return Ok(WaiterScan::Pending);
                }
                return match self.tasks.wake(task.task_id, task.state).await {
                    Ok(_) => {
                        debug!(lock_id = %lock, task_id = %task.task_id, "waiter woken");
                        Ok(WaiterScan::Woken(task.task_id))
                    }
                    // 読んだ後に状態が変わった。その持ち主が自分で進める
                    Err(SchedulerError::Conflict(_)) => Ok(WaiterScan::Pending),
                    Err(err) => Err(err),
                };
            }
            match next {
                Some(marker) => after = Some(marker),
                None => return Ok(WaiterScan::Empty),
            }
        }
    }
}
