//! `tasks` table.
//!
//! Writes made while a task is owned are conditioned on `ownerLeaseRef` and
//! touch only the fields they mean to change, so a concurrent `cancel` (which
//! only sets `canceledBy`) is never overwritten.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use super::{from_item, read_page, to_item, OnConflict};
use crate::domain::{EntityType, LeaseId, OwnerRef, PageIterator, TaskId, TaskInfo, TaskState, SENTINEL};
use crate::error::SchedulerError;
use crate::ports::{Key, Query, QueryKey, Store, Table, Update};

const STATE: &str = "state";
const OWNER: &str = "ownerLeaseRef";
const LOCK_IDS: &str = "lockIds";
const PREREQUISITES: &str = "prerequisiteTaskIds";
const CHECKPOINT: &str = "checkpointData";
const ERROR_MESSAGE: &str = "errorMessage";
const ERROR_ID: &str = "errorId";
const STACK_TRACE: &str = "stackTrace";
const START_TIME: &str = "startTime";
const END_TIME: &str = "endTime";
const RUN_COUNT: &str = "runCount";
const MS_REMAINING: &str = "millisecondsRemaining";
const INTERVAL_STARTED_AT: &str = "intervalStartedAt";
const CANCELED_BY: &str = "canceledBy";

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339())
}

/// The set of field changes a worker commits for a task it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPatch {
    update: Update,
}

impl TaskPatch {
    pub fn state(state: TaskState) -> Self {
        Self {
            update: Update::new().set(STATE, state.as_str()),
        }
    }

    /// Hand the task back (waiting or queued).
    pub fn unowned(mut self) -> Self {
        self.update = self.update.set(OWNER, SENTINEL);
        self
    }

    /// Terminal tasks leave the owner index.
    pub fn disowned(mut self) -> Self {
        self.update = self.update.remove(OWNER);
        self
    }

    pub fn started(mut self, at: DateTime<Utc>) -> Self {
        self.update = self.update.set(START_TIME, timestamp(at)).increment(RUN_COUNT, 1);
        self
    }

    pub fn ended(mut self, at: DateTime<Utc>) -> Self {
        self.update = self.update.set(END_TIME, timestamp(at));
        self
    }

    /// Begin (or continue) counting down `remaining_ms` from `started_at`.
    pub fn interval(mut self, remaining_ms: u64, started_at: DateTime<Utc>) -> Self {
        self.update = self
            .update
            .set(MS_REMAINING, remaining_ms)
            .set(INTERVAL_STARTED_AT, timestamp(started_at));
        self
    }

    pub fn clear_interval(mut self) -> Self {
        self.update = self.update.remove(MS_REMAINING).remove(INTERVAL_STARTED_AT);
        self
    }

    pub fn error(mut self, message: &str, error_id: &str, stack_trace: Option<&str>) -> Self {
        self.update = self
            .update
            .set(ERROR_MESSAGE, message)
            .set(ERROR_ID, error_id)
            .set_opt(STACK_TRACE, stack_trace);
        self
    }

    /// Persist what a handler changed before asking to run again.
    pub fn carry(mut self, next: &TaskInfo) -> Self {
        let lock_ids: Vec<String> = next.lock_ids.iter().cloned().collect();
        let prerequisites: Vec<String> = next.prerequisite_task_ids.iter().map(|id| id.sortable()).collect();
        self.update = self
            .update
            .set(LOCK_IDS, lock_ids)
            .set(PREREQUISITES, prerequisites)
            .set_opt(CHECKPOINT, next.checkpoint_data.clone())
            .set_opt(MS_REMAINING, next.milliseconds_remaining)
            .remove(INTERVAL_STARTED_AT);
        self
    }

    fn into_update(self, lease: LeaseId) -> Update {
        self.update.when_equals(OWNER, lease.key())
    }
}

#[derive(Clone)]
pub struct TaskRepo {
    store: Arc<dyn Store>,
    page_size: usize,
}

impl TaskRepo {
    pub fn new(store: Arc<dyn Store>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    fn key(task_id: TaskId) -> Key {
        Key::hash(task_id.sortable())
    }

    pub async fn insert(&self, task: &TaskInfo) -> Result<(), SchedulerError> {
        let item = to_item(task)?;
        self.store.put(Table::Tasks, &Self::key(task.task_id), item).await?;
        Ok(())
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Option<TaskInfo>, SchedulerError> {
        match self.store.get(Table::Tasks, &Self::key(task_id)).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    /// QUEUED/WAITING_* → RUNNING under `lease`. Requires the task to be
    /// unowned and still in the state it was read in.
    pub async fn claim(&self, task: &TaskInfo, lease: LeaseId) -> Result<TaskInfo, SchedulerError> {
        let update = Update::new()
            .when_equals(OWNER, SENTINEL)
            .when_equals(STATE, task.state.as_str())
            .set(OWNER, lease.key())
            .set(STATE, TaskState::Running.as_str());
        let item = self
            .store
            .update(Table::Tasks, &Self::key(task.task_id), &update)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("claim {}", task.task_id)))?;
        from_item(item)
    }

    /// Apply `patch` to a task owned by `lease`. Ownership loss is `LostLease`.
    pub async fn commit(
        &self,
        task_id: TaskId,
        lease: LeaseId,
        patch: TaskPatch,
    ) -> Result<TaskInfo, SchedulerError> {
        let item = self
            .store
            .update(Table::Tasks, &Self::key(task_id), &patch.into_update(lease))
            .await
            .on_conflict(|| SchedulerError::LostLease(lease))?;
        from_item(item)
    }

    /// WAITING_* → QUEUED for an unowned waiter.
    pub async fn wake(&self, task_id: TaskId, from: TaskState) -> Result<TaskInfo, SchedulerError> {
        let update = Update::new()
            .when_equals(OWNER, SENTINEL)
            .when_equals(STATE, from.as_str())
            .set(STATE, TaskState::Queued.as_str());
        let item = self
            .store
            .update(Table::Tasks, &Self::key(task_id), &update)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("wake {task_id}")))?;
        from_item(item)
    }

    /// Mark `task` canceled, provided it is still in the state it was read in.
    pub async fn cancel(&self, task: &TaskInfo, canceled_by: &str) -> Result<TaskInfo, SchedulerError> {
        let mut update = Update::new()
            .when_equals(STATE, task.state.as_str())
            .set(CANCELED_BY, canceled_by);
        if task.state == TaskState::WaitingForInterval && task.is_unowned() {
            update = update
                .when_equals(OWNER, SENTINEL)
                .set(STATE, TaskState::Queued.as_str());
        }
        let item = self
            .store
            .update(Table::Tasks, &Self::key(task.task_id), &update)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("cancel {}", task.task_id)))?;
        from_item(item)
    }

    /// Hand a task owned by a dead lease back to the queue.
    pub async fn requeue_orphan(&self, task_id: TaskId, dead: LeaseId) -> Result<TaskInfo, SchedulerError> {
        let update = Update::new()
            .when_equals(OWNER, dead.key())
            .set(OWNER, SENTINEL)
            .set(STATE, TaskState::Queued.as_str());
        let item = self
            .store
            .update(Table::Tasks, &Self::key(task_id), &update)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("requeue {task_id}")))?;
        from_item(item)
    }

    /// One page of the `owner` index, in task id order.
    pub async fn owned_by(
        &self,
        owner: OwnerRef,
        after: Option<String>,
    ) -> Result<(Vec<TaskInfo>, Option<String>), SchedulerError> {
        let query = Query {
            table: Table::Tasks,
            key: QueryKey::Index {
                name: "owner",
                value: owner.key(),
            },
            after,
            limit: self.page_size,
        };
        read_page(&self.store, &query).await
    }

    pub async fn by_entity_type(
        &self,
        entity_type: &EntityType,
        page: &mut PageIterator,
    ) -> Result<Vec<TaskInfo>, SchedulerError> {
        if !page.has_next() {
            return Ok(Vec::new());
        }
        let query = Query {
            table: Table::Tasks,
            key: QueryKey::Index {
                name: "entity",
                value: entity_type.as_str().to_string(),
            },
            after: page.marker.clone(),
            limit: page.page_size,
        };
        let (tasks, next) = read_page(&self.store, &query).await?;
        page.advance(next);
        Ok(tasks)
    }

    /// Every task of `entity_type` whose entity id is `entity_id`.
    pub async fn find_by_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Vec<TaskInfo>, SchedulerError> {
        let mut page = PageIterator::new(self.page_size);
        let mut found = Vec::new();
        while page.has_next() {
            let tasks = self.by_entity_type(entity_type, &mut page).await?;
            found.extend(tasks.into_iter().filter(|t| t.entity_id == entity_id));
        }
        Ok(found)
    }
}
