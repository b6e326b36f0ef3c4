//! WorkerLoop - 1 タスク分の実行
//!
//! # フロー
//! 1. 有効な lease を取得し、タスクを読む
//! 2. QUEUED / WAITING_* かつ所有者なしなら claim（RUNNING, owner = lease）
//! 3. 取消・インターバル・ロック取得のどれかで状態を進める
//! 4. ロックが揃えば handler を実行し、結果を commit してロックを解放する
//!
//! claim 以降の書き込みはすべて `ownerLeaseRef == lease` を条件にする。
//! 条件が外れたら（lease が死んだ、reaper に回収された）何も書かずに抜ける。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::graph::check_prerequisites;
use super::scheduler::Shared;
use crate::coordinator::{request_set, BlockedOn};
use crate::domain::{check_named_lock, LockId, OwnerRef, TaskId, TaskInfo, TaskState};
use crate::error::{HandlerError, SchedulerError};
use crate::handler::TaskContext;
use crate::lease::LeaseHandle;
use crate::repo::TaskPatch;

fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// Entry point of a local dispatch.
pub(crate) async fn run_task(shared: &Arc<Shared>, task_id: TaskId) -> Result<(), SchedulerError> {
    let lease = shared.leases.acquire_lease().await?;
    let Some(task) = shared.tasks.get(task_id).await? else {
        warn!(task_id = %task_id, "dispatched task does not exist");
        return Ok(());
    };
    if !task.state.is_claimable() || !task.is_unowned() {
        debug!(task_id = %task_id, state = %task.state, "task is not runnable here");
        return Ok(());
    }

    // 期限前のインターバルは claim せずにタイマーを張り直す
    if task.state == TaskState::WaitingForInterval
        && task.canceled_by.is_none()
        && let Some(remaining) = task.interval_remaining_ms(shared.clock.now())
        && remaining > 0
    {
        shared.dispatch(task_id, millis(remaining));
        return Ok(());
    }

    lease.ensure_valid()?;
    let claimed = match shared.tasks.claim(&task, lease.lease_id()).await {
        Ok(claimed) => claimed,
        Err(SchedulerError::Conflict(_)) => {
            debug!(task_id = %task_id, "claimed by someone else");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    debug!(task_id = %task_id, lease_id = %lease.lease_id(), from = %task.state, "task claimed");

    Run {
        shared,
        lease: &lease,
        task: claimed,
    }
    .process()
    .await
}

/// Log a failed run at a level matching how expected the failure is.
pub(crate) fn log_failure(task_id: TaskId, err: &SchedulerError) {
    match err {
        SchedulerError::LostLease(lease_id) => {
            warn!(task_id = %task_id, lease_id = %lease_id, "lease lost mid-run; task left for the reaper");
        }
        SchedulerError::Closed => {
            debug!(task_id = %task_id, "participant is stopping; run skipped");
        }
        SchedulerError::Conflict(what) => {
            debug!(task_id = %task_id, conflict = %what, "run abandoned after a lost race");
        }
        other => error!(task_id = %task_id, error = %other, "task run failed"),
    }
}

/// One claimed task, owned by `lease` until it is handed back.
struct Run<'a> {
    shared: &'a Arc<Shared>,
    lease: &'a LeaseHandle,
    task: TaskInfo,
}

impl Run<'_> {
    fn task_id(&self) -> TaskId {
        self.task.task_id
    }

    async fn process(self) -> Result<(), SchedulerError> {
        if self.task.canceled_by.is_some() {
            return self.cancel().await;
        }
        if let Some(ms) = self.task.milliseconds_remaining {
            return self.interval(ms).await;
        }

        let result = self.shared.coordinator.try_acquire_all(&self.task, self.lease).await?;
        match result.blocked_on {
            Some(BlockedOn::Lock(lock)) => self.wait_for_lock(lock).await,
            Some(BlockedOn::Prerequisite(prerequisite)) => self.wait_for_prerequisite(prerequisite).await,
            None => self.execute().await,
        }
    }

    async fn commit(&self, patch: TaskPatch) -> Result<TaskInfo, SchedulerError> {
        self.lease.ensure_valid()?;
        self.shared.tasks.commit(self.task_id(), self.lease.lease_id(), patch).await
    }

    /// Release `task`'s request set and dispatch whoever was handed a lock.
    async fn release(&self, task: &TaskInfo) -> Result<(), SchedulerError> {
        self.lease.ensure_valid()?;
        let locks = request_set(task);
        match self
            .shared
            .coordinator
            .release(&locks, task.task_id, self.lease.lease_id())
            .await
        {
            Ok(woken) => {
                for next in woken {
                    self.shared.dispatch_jittered(next);
                }
                Ok(())
            }
            Err(err) => {
                // 解放できなかったロックは lease ごと reaper に任せる
                self.lease.fail("lock release kept failing");
                Err(err)
            }
        }
    }

    async fn cancel(self) -> Result<(), SchedulerError> {
        // 待機中に取ったロックは claim した参加者の lease のままになっている
        self.shared.coordinator.adopt_held(&self.task, self.lease).await?;
        let patch = TaskPatch::state(TaskState::Canceled)
            .disowned()
            .ended(self.shared.clock.now())
            .clear_interval();
        let done = self.commit(patch).await?;
        info!(task_id = %done.task_id, canceled_by = done.canceled_by.as_deref().unwrap_or_default(), "task canceled");
        self.release(&done).await
    }

    async fn interval(self, ms: u64) -> Result<(), SchedulerError> {
        let now = self.shared.clock.now();
        if self.task.interval_started_at.is_none() {
            self.commit(TaskPatch::state(TaskState::WaitingForInterval).unowned().interval(ms, now))
                .await?;
            debug!(task_id = %self.task_id(), delay_ms = ms, "interval started");
            self.shared.dispatch(self.task_id(), Duration::from_millis(ms));
            return Ok(());
        }

        let remaining = self.task.interval_remaining_ms(now).unwrap_or(0);
        if remaining <= 0 {
            self.commit(TaskPatch::state(TaskState::Queued).unowned().clear_interval())
                .await?;
            debug!(task_id = %self.task_id(), "interval elapsed");
            self.shared.dispatch(self.task_id(), Duration::ZERO);
        } else {
            let left = u64::try_from(remaining).unwrap_or(0);
            self.commit(TaskPatch::state(TaskState::WaitingForInterval).unowned().interval(left, now))
                .await?;
            debug!(task_id = %self.task_id(), remaining_ms = left, "interval resumed");
            self.shared.dispatch(self.task_id(), millis(remaining));
        }
        Ok(())
    }

    async fn wait_for_lock(self, lock: LockId) -> Result<(), SchedulerError> {
        self.commit(TaskPatch::state(TaskState::WaitingForLock).unowned()).await?;
        debug!(task_id = %self.task_id(), lock_id = %lock, "waiting for lock");
        // 保持者が書き込みの間に解放していたら、誰も起こしてくれない
        if self.shared.coordinator.is_free(&lock).await? {
            self.shared.dispatch_jittered(self.task_id());
        }
        Ok(())
    }

    async fn wait_for_prerequisite(self, prerequisite: TaskId) -> Result<(), SchedulerError> {
        self.commit(TaskPatch::state(TaskState::WaitingForPrerequisite).unowned())
            .await?;
        debug!(task_id = %self.task_id(), prerequisite = %prerequisite, "waiting for prerequisite");
        if self.shared.coordinator.prerequisite_done(prerequisite).await? {
            self.shared.dispatch_jittered(self.task_id());
        }
        Ok(())
    }

    async fn execute(self) -> Result<(), SchedulerError> {
        let Some(handler) = self.shared.registry.get(&self.task.entity_type).cloned() else {
            let err = SchedulerError::HandlerNotFound(self.task.entity_type.clone());
            warn!(task_id = %self.task_id(), error = %err, "returning task to the queue");
            self.release(&self.task).await?;
            self.commit(TaskPatch::state(TaskState::Queued).unowned()).await?;
            return Ok(());
        };

        let started = self
            .commit(TaskPatch::state(TaskState::Running).started(self.shared.clock.now()))
            .await?;
        debug!(task_id = %started.task_id, run_count = started.run_count, "handler starting");

        let ctx = TaskContext::new(started.clone(), self.lease.cancellation_token());
        let join = tokio::spawn(async move { handler.run(ctx).await });
        let abort = join.abort_handle();
        let outcome = match self.shared.leases.run(self.lease, join).await {
            None => {
                abort.abort();
                return Err(SchedulerError::LostLease(self.lease.lease_id()));
            }
            Some(Err(join_err)) => Err(HandlerError::new(format!("handler panicked: {join_err}"))),
            Some(Ok(result)) => result,
        };

        match outcome {
            Ok(None) => self.succeed().await,
            Ok(Some(next)) => self.requeue(started, next).await,
            Err(err) => self.fail(err).await,
        }
    }

    async fn succeed(self) -> Result<(), SchedulerError> {
        let done = self
            .commit(
                TaskPatch::state(TaskState::Success)
                    .disowned()
                    .ended(self.shared.clock.now()),
            )
            .await?;
        info!(task_id = %done.task_id, entity_type = %done.entity_type, run_count = done.run_count, "task succeeded");
        self.release(&done).await
    }

    async fn fail(self, err: HandlerError) -> Result<(), SchedulerError> {
        let error_id = Ulid::new().to_string();
        let done = self
            .commit(
                TaskPatch::state(TaskState::Failed)
                    .disowned()
                    .ended(self.shared.clock.now())
                    .error(err.message(), &error_id, err.stack_trace()),
            )
            .await?;
        warn!(task_id = %done.task_id, error_id = %error_id, error = %err, "task failed");
        self.release(&done).await
    }

    /// The handler asked to run again. Identity fields always come from the
    /// stored record; only locks, prerequisites, checkpoint and delay carry.
    async fn requeue(self, started: TaskInfo, next: TaskInfo) -> Result<(), SchedulerError> {
        if let Err(err) = self.vet(&next).await {
            return self.fail(HandlerError::new(err.to_string())).await;
        }

        self.release(&started).await?;
        let queued = self
            .commit(TaskPatch::state(TaskState::Queued).unowned().carry(&next))
            .await?;
        debug!(task_id = %queued.task_id, delay_ms = ?queued.milliseconds_remaining, "task requeued");
        self.shared.dispatch(queued.task_id, Duration::ZERO);
        Ok(())
    }

    async fn vet(&self, next: &TaskInfo) -> Result<(), SchedulerError> {
        for lock_id in &next.lock_ids {
            check_named_lock(lock_id).map_err(SchedulerError::InvalidTask)?;
        }
        check_prerequisites(&self.shared.tasks, self.task_id(), &next.prerequisite_task_ids).await
    }
}

/// Periodic sweep over unowned tasks. Catches work whose local dispatch was
/// lost: tasks added while no participant was monitoring, due intervals, and
/// waiters whose wake-up never arrived.
pub(crate) async fn poll_loop(shared: Arc<Shared>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.poll_interval_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match poll_once(&shared).await {
            Ok(0) => {}
            Ok(dispatched) => debug!(dispatched, "poll sweep dispatched tasks"),
            Err(err) => error!(error = %err, "poll sweep failed"),
        }
    }
    debug!("poll loop stopped");
}

pub(crate) async fn poll_once(shared: &Arc<Shared>) -> Result<usize, SchedulerError> {
    let now = shared.clock.now();
    let mut dispatched = 0;
    let mut after = None;
    loop {
        let (tasks, next) = shared.tasks.owned_by(OwnerRef::Unowned, after).await?;
        for task in tasks {
            let due = match task.state {
                TaskState::Queued => true,
                TaskState::WaitingForInterval => task.interval_remaining_ms(now).is_none_or(|ms| ms <= 0),
                TaskState::WaitingForLock | TaskState::WaitingForPrerequisite => {
                    shared.coordinator.can_progress(&task).await?
                }
                _ => false,
            };
            if due {
                shared.dispatch_jittered(task.task_id);
                dispatched += 1;
            }
        }
        match next {
            Some(marker) => after = Some(marker),
            None => return Ok(dispatched),
        }
    }
}
