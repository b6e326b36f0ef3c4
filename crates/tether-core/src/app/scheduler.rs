//! TaskScheduler - タスクの投入・取消・照会とキュー監視のライフサイクル
//!
//! 1 つの `TaskScheduler` が 1 つの参加者プロセスに相当する。複数の
//! `TaskScheduler` が同じ `Store` を共有すれば、それぞれが別の lease を持つ
//! 独立した参加者として振る舞う。

use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::builder::SchedulerBuilder;
use super::graph::check_prerequisites;
use super::reaper_loop::{self, REAP_ENTITY_TYPE};
use super::worker_loop;
use crate::config::SchedulerConfig;
use crate::coordinator::LockCoordinator;
use crate::domain::{
    check_named_lock, EntityType, NewTask, PageIterator, TaskBuilder, TaskId, TaskInfo, TaskState,
};
use crate::error::SchedulerError;
use crate::handler::HandlerRegistry;
use crate::lease::{LeaseManager, LeaseShutdown};
use crate::ports::{Clock, Sequence};
use crate::repo::{LockRepo, TaskRepo};

/// Sequence name task ids are drawn from.
const TASK_SEQUENCE: &str = "tasks";

/// Bounded retries for a cancel racing with state changes.
const CANCEL_ATTEMPTS: usize = 5;

/// Background work started by `monitor_task_queue`.
#[derive(Clone)]
pub(crate) struct DispatchScope {
    pub(crate) token: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

/// Gate for local dispatch: open only while the queue monitor runs.
pub(crate) struct Dispatcher {
    scope: Mutex<Option<DispatchScope>>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    fn new(max_workers: usize) -> Self {
        Self {
            scope: Mutex::new(None),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DispatchScope>> {
        self.scope.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<DispatchScope> {
        self.lock().clone()
    }

    /// Open the gate. `None` if it was already open.
    fn start(&self) -> Option<DispatchScope> {
        let mut scope = self.lock();
        if scope.is_some() {
            return None;
        }
        let fresh = DispatchScope {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        *scope = Some(fresh.clone());
        Some(fresh)
    }

    fn stop(&self) -> Option<DispatchScope> {
        self.lock().take()
    }
}

/// State shared by the public handle, the workers and the background loops.
pub(crate) struct Shared {
    pub(crate) tasks: TaskRepo,
    pub(crate) locks: LockRepo,
    pub(crate) coordinator: LockCoordinator,
    pub(crate) leases: LeaseManager,
    pub(crate) registry: HandlerRegistry,
    pub(crate) sequence: Arc<dyn Sequence>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SchedulerConfig,
    dispatcher: Dispatcher,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tasks: TaskRepo,
        locks: LockRepo,
        coordinator: LockCoordinator,
        leases: LeaseManager,
        registry: HandlerRegistry,
        sequence: Arc<dyn Sequence>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.max_workers);
        Self {
            tasks,
            locks,
            coordinator,
            leases,
            registry,
            sequence,
            clock,
            config,
            dispatcher,
        }
    }

    /// Run `task_id` on the local worker pool after `delay`.
    /// A no-op while the queue monitor is stopped; the poll sweep of some
    /// participant picks the task up instead.
    pub(crate) fn dispatch(self: &Arc<Self>, task_id: TaskId, delay: Duration) {
        let Some(scope) = self.dispatcher.current() else {
            debug!(task_id = %task_id, "queue monitor stopped; not dispatching");
            return;
        };
        let token = scope.token.clone();
        let shared = Arc::clone(self);
        scope.tracker.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let permit = tokio::select! {
                _ = token.cancelled() => return,
                permit = Arc::clone(&shared.dispatcher.permits).acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                return;
            };
            if let Err(err) = worker_loop::run_task(&shared, task_id).await {
                worker_loop::log_failure(task_id, &err);
            }
        });
    }

    /// Dispatch with a random delay of up to `max_dispatch_jitter`.
    pub(crate) fn dispatch_jittered(self: &Arc<Self>, task_id: TaskId) {
        let max = self.config.max_dispatch_jitter_ms;
        let delay = if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max))
        };
        self.dispatch(task_id, delay);
    }

    /// Validate, persist as QUEUED and dispatch.
    pub(crate) async fn submit(self: &Arc<Self>, task: NewTask) -> Result<TaskInfo, SchedulerError> {
        if task.entity_type.as_str().is_empty() {
            return Err(SchedulerError::InvalidTask("entity type must not be empty".to_string()));
        }
        for lock_id in &task.lock_ids {
            check_named_lock(lock_id).map_err(SchedulerError::InvalidTask)?;
        }

        let task_id = TaskId::new(self.sequence.next(TASK_SEQUENCE).await?);
        check_prerequisites(&self.tasks, task_id, &task.prerequisite_task_ids).await?;

        let record = task.into_record(task_id);
        self.tasks.insert(&record).await?;
        info!(task_id = %task_id, entity_type = %record.entity_type, entity_id = %record.entity_id, "task added");

        self.dispatch(task_id, Duration::ZERO);
        Ok(record)
    }
}

/// Handle of one participant. Cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn create_task(
        &self,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
    ) -> TaskBuilder {
        TaskBuilder::new(entity_type, entity_id)
    }

    /// Persist `task` as QUEUED and dispatch it. The returned record carries
    /// the allocated id; execution happens asynchronously.
    pub async fn add_task(&self, task: NewTask) -> Result<TaskInfo, SchedulerError> {
        if task.entity_type.as_str() == REAP_ENTITY_TYPE {
            return Err(SchedulerError::InvalidTask(format!(
                "entity type {REAP_ENTITY_TYPE} is reserved"
            )));
        }
        self.shared.submit(task).await
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskInfo>, SchedulerError> {
        self.shared.tasks.get(task_id).await
    }

    /// One page of tasks of `entity_type`, ordered by entity id then task id.
    pub async fn get_tasks_by_entity_type(
        &self,
        entity_type: impl Into<EntityType>,
        page: &mut PageIterator,
    ) -> Result<Vec<TaskInfo>, SchedulerError> {
        self.shared.tasks.by_entity_type(&entity_type.into(), page).await
    }

    /// Request cancellation. Terminal tasks are returned unchanged. A running
    /// task finishes its current handler invocation first.
    pub async fn cancel_task(&self, canceled_by: &str, task_id: TaskId) -> Result<TaskInfo, SchedulerError> {
        for _ in 0..CANCEL_ATTEMPTS {
            let task = self
                .shared
                .tasks
                .get(task_id)
                .await?
                .ok_or(SchedulerError::TaskNotFound(task_id))?;
            if task.is_terminal() {
                return Ok(task);
            }
            match self.shared.tasks.cancel(&task, canceled_by).await {
                Ok(updated) => {
                    info!(task_id = %task_id, canceled_by, state = %updated.state, "cancel requested");
                    if updated.state != TaskState::Running {
                        self.shared.dispatch(task_id, Duration::ZERO);
                    }
                    return Ok(updated);
                }
                Err(SchedulerError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(SchedulerError::Conflict(format!("cancel {task_id} kept racing")))
    }

    /// Start the poll sweep and the reaper, and enable local dispatch. Idempotent.
    pub fn monitor_task_queue(&self) {
        let Some(scope) = self.shared.dispatcher.start() else {
            return;
        };
        self.shared.leases.open();
        info!(node = %self.shared.config.node_identity, "task queue monitor started");
        scope
            .tracker
            .spawn(worker_loop::poll_loop(Arc::clone(&self.shared), scope.token.clone()));
        scope
            .tracker
            .spawn(reaper_loop::run(Arc::clone(&self.shared), scope.token.clone()));
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.dispatcher.current().is_some()
    }

    /// Stop background dispatch, wait for (or interrupt) in-flight work, then
    /// release what the lease still holds and retire it.
    pub async fn stop_task_queue_monitor(&self, may_interrupt: bool) {
        let Some(scope) = self.shared.dispatcher.stop() else {
            return;
        };
        scope.token.cancel();
        scope.tracker.close();

        let shutdown = if may_interrupt {
            let shutdown = self.shared.leases.shutdown().await;
            self.wait_for(&scope.tracker).await;
            shutdown
        } else {
            self.wait_for(&scope.tracker).await;
            self.shared.leases.shutdown().await
        };

        match shutdown {
            Some(LeaseShutdown {
                lease_id,
                drained: true,
            }) => {
                if let Err(err) = reaper_loop::release_lease(&self.shared, lease_id).await {
                    warn!(lease_id = %lease_id, error = %err, "failed to release lease on shutdown; leaving it to the reaper");
                }
            }
            Some(LeaseShutdown {
                lease_id,
                drained: false,
            }) => {
                warn!(lease_id = %lease_id, "work did not drain in time; leaving lease to the reaper");
            }
            None => {}
        }
        info!(node = %self.shared.config.node_identity, "task queue monitor stopped");
    }

    async fn wait_for(&self, tracker: &TaskTracker) {
        if tokio::time::timeout(self.shared.config.reap_threshold(), tracker.wait())
            .await
            .is_err()
        {
            warn!("in-flight work did not finish within the reap threshold");
        }
    }

    /// Simulates `kill -9`: stops everything without writing anything.
    #[cfg(test)]
    pub(crate) async fn crash(&self) {
        if let Some(scope) = self.shared.dispatcher.stop() {
            scope.token.cancel();
            self.shared.leases.crash().await;
            scope.tracker.close();
            let _ = tokio::time::timeout(Duration::from_secs(5), scope.tracker.wait()).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}
