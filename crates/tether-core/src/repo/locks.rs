//! `locks` table: one holder row and any number of waiter rows per lock.

use std::sync::Arc;

use super::{from_item, read_page, to_item, OnConflict};
use crate::domain::{HolderRow, LeaseId, LockId, TaskId, WaiterRow, SENTINEL};
use crate::error::SchedulerError;
use crate::ports::{Condition, Key, Query, QueryKey, Store, Table, Update};

const OWNER: &str = "ownerLeaseRef";
const RUNNING_TASK: &str = "runningTaskId";
const GENERATION: &str = "generation";

#[derive(Clone)]
pub struct LockRepo {
    store: Arc<dyn Store>,
    page_size: usize,
}

impl LockRepo {
    pub fn new(store: Arc<dyn Store>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    fn holder_key(lock: &LockId) -> Key {
        Key::compound(lock.key(), SENTINEL)
    }

    fn waiter_key(lock: &LockId, task_id: TaskId) -> Key {
        Key::compound(lock.key(), task_id.sortable())
    }

    /// Idempotent.
    pub async fn enqueue_waiter(&self, lock: &LockId, task_id: TaskId) -> Result<(), SchedulerError> {
        let row = WaiterRow {
            lock_id: lock.key(),
            row_id: task_id.sortable(),
            task_id,
        };
        self.store
            .put(Table::Locks, &Self::waiter_key(lock, task_id), to_item(&row)?)
            .await?;
        Ok(())
    }

    pub async fn remove_waiter(&self, lock: &LockId, task_id: TaskId) -> Result<(), SchedulerError> {
        self.store
            .delete(Table::Locks, &Self::waiter_key(lock, task_id), &[])
            .await?;
        Ok(())
    }

    pub async fn holder(&self, lock: &LockId) -> Result<Option<HolderRow>, SchedulerError> {
        match self.store.get(Table::Locks, &Self::holder_key(lock)).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    /// Take the lock for `task_id` under `lease`. Succeeds when the lock is
    /// free or already held for the same task. Always bumps `generation`.
    pub async fn acquire(
        &self,
        lock: &LockId,
        task_id: TaskId,
        lease: LeaseId,
    ) -> Result<HolderRow, SchedulerError> {
        let update = Update::new()
            .when(Condition::AnyOf(vec![
                Condition::NotExists(OWNER.to_string()),
                Condition::equals(RUNNING_TASK, task_id.sortable()),
            ]))
            .set(OWNER, lease.key())
            .set(RUNNING_TASK, task_id.sortable())
            .increment(GENERATION, 1);
        let item = self
            .store
            .update(Table::Locks, &Self::holder_key(lock), &update)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("acquire {lock}")))?;
        from_item(item)
    }

    /// Record a failed acquisition attempt.
    pub async fn bump_generation(&self, lock: &LockId) -> Result<(), SchedulerError> {
        self.store
            .update(Table::Locks, &Self::holder_key(lock), &Update::new().increment(GENERATION, 1))
            .await?;
        Ok(())
    }

    /// Clear the holder if it is `(owner, task_id)`. Returns the now-free row.
    pub async fn clear_holder(
        &self,
        lock: &LockId,
        task_id: TaskId,
        owner: LeaseId,
    ) -> Result<HolderRow, SchedulerError> {
        let update = Update::new()
            .when_equals(OWNER, owner.key())
            .when_equals(RUNNING_TASK, task_id.sortable())
            .remove(OWNER)
            .remove(RUNNING_TASK);
        let item = self
            .store
            .update(Table::Locks, &Self::holder_key(lock), &update)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("release {lock}")))?;
        from_item(item)
    }

    /// Delete a free holder row, unless somebody touched it since `generation`.
    pub async fn delete_idle_holder(&self, lock: &LockId, generation: i64) -> Result<(), SchedulerError> {
        let conditions = [
            Condition::equals(GENERATION, generation),
            Condition::NotExists(OWNER.to_string()),
        ];
        self.store
            .delete(Table::Locks, &Self::holder_key(lock), &conditions)
            .await
            .on_conflict(|| SchedulerError::Conflict(format!("delete holder of {lock}")))
    }

    /// One page of waiter rows in FIFO order. The holder row (`"-"`) sorts
    /// before every zero-padded task id, so starting after it skips it.
    pub async fn waiters(
        &self,
        lock: &LockId,
        after: Option<String>,
    ) -> Result<(Vec<WaiterRow>, Option<String>), SchedulerError> {
        let query = Query {
            table: Table::Locks,
            key: QueryKey::Partition(lock.key()),
            after: Some(after.unwrap_or_else(|| SENTINEL.to_string())),
            limit: self.page_size,
        };
        read_page(&self.store, &query).await
    }

    /// Holder rows currently owned by `lease`.
    pub async fn held_by(
        &self,
        lease: LeaseId,
        after: Option<String>,
    ) -> Result<(Vec<HolderRow>, Option<String>), SchedulerError> {
        let query = Query {
            table: Table::Locks,
            key: QueryKey::Index {
                name: "owner",
                value: lease.key(),
            },
            after,
            limit: self.page_size,
        };
        read_page(&self.store, &query).await
    }
}
