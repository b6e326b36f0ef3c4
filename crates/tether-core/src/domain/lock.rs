//! Lock table rows and the global lock order.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{LeaseId, TaskId};

/// Row id of a holder row, and the stored form of an unowned task.
pub const SENTINEL: &str = "-";

/// Prefix reserved for self-locks. Named locks may not start with it.
pub const SELF_LOCK_PREFIX: &str = "@task/";

/// A lock identifier.
///
/// The derived `Ord` is the global acquisition order: every self-lock (by task
/// id) sorts before every named lock (by string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockId {
    SelfLock(TaskId),
    Named(String),
}

impl LockId {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Key of the lock's partition in the `locks` table.
    pub fn key(&self) -> String {
        match self {
            Self::SelfLock(task_id) => format!("{SELF_LOCK_PREFIX}{}", task_id.sortable()),
            Self::Named(name) => name.clone(),
        }
    }

    pub fn from_key(key: &str) -> Self {
        key.strip_prefix(SELF_LOCK_PREFIX)
            .and_then(TaskId::from_sortable)
            .map(Self::SelfLock)
            .unwrap_or_else(|| Self::Named(key.to_string()))
    }

    pub fn self_task(&self) -> Option<TaskId> {
        match self {
            Self::SelfLock(task_id) => Some(*task_id),
            Self::Named(_) => None,
        }
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfLock(task_id) => write!(f, "self({task_id})"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Why a user-supplied lock name is rejected, if it is.
pub fn check_named_lock(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("lock id must not be empty".to_string());
    }
    if name.starts_with(SELF_LOCK_PREFIX) {
        return Err(format!(
            "lock id {name:?} uses the reserved prefix {SELF_LOCK_PREFIX:?}"
        ));
    }
    Ok(())
}

/// `rowId = SENTINEL`: who currently holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderRow {
    pub lock_id: String,
    pub row_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_task_id: Option<TaskId>,
    /// Present iff the lock is held.
    #[serde(default, rename = "ownerLeaseRef", skip_serializing_if = "Option::is_none")]
    pub owner: Option<LeaseId>,
    /// Bumped on every acquisition attempt.
    #[serde(default)]
    pub generation: i64,
}

impl HolderRow {
    pub fn is_held(&self) -> bool {
        self.owner.is_some()
    }
}

/// `rowId = sortable(taskId)`: a task interested in the lock, FIFO by task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaiterRow {
    pub lock_id: String,
    pub row_id: String,
    pub task_id: TaskId,
}
