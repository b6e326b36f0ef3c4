use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use super::{LeaseId, TaskId, TaskState, SENTINEL};

/// Selects the handler a task runs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who may mutate a non-terminal task.
///
/// Stored as the sentinel `"-"` when nobody owns it, or the bare lease id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerRef {
    Unowned,
    Lease(LeaseId),
}

impl OwnerRef {
    pub fn key(&self) -> String {
        match self {
            Self::Unowned => SENTINEL.to_string(),
            Self::Lease(id) => id.key(),
        }
    }

    pub fn lease(&self) -> Option<LeaseId> {
        match self {
            Self::Unowned => None,
            Self::Lease(id) => Some(*id),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unowned => f.write_str("unowned"),
            Self::Lease(id) => id.fmt(f),
        }
    }
}

impl Serialize for OwnerRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for OwnerRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == SENTINEL {
            return Ok(Self::Unowned);
        }
        raw.parse::<LeaseId>()
            .map(Self::Lease)
            .map_err(|e| serde::de::Error::custom(format!("invalid owner ref {raw:?}: {e}")))
    }
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub lock_ids: BTreeSet<String>,
    #[serde(default)]
    pub prerequisite_task_ids: BTreeSet<TaskId>,
    /// Absent once the task is terminal.
    #[serde(default, rename = "ownerLeaseRef", skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milliseconds_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_by: Option<String>,
}

impl TaskInfo {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_unowned(&self) -> bool {
        self.owner == Some(OwnerRef::Unowned)
    }

    /// Checkpoint data as UTF-8, if it is valid UTF-8.
    pub fn checkpoint_str(&self) -> Option<&str> {
        self.checkpoint_data
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Handler-side helper: keep `data` for the next run.
    pub fn with_checkpoint_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.checkpoint_data = Some(data.into());
        self
    }

    /// Handler-side helper: wait `ms` before the next run.
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.milliseconds_remaining = Some(ms);
        self
    }

    /// Milliseconds left on the current interval as of `now`.
    ///
    /// `None` unless the task carries a delay. Negative once the delay is over.
    pub fn interval_remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let total = i64::try_from(self.milliseconds_remaining?).unwrap_or(i64::MAX);
        let elapsed = self
            .interval_started_at
            .map(|started| (now - started).num_milliseconds().max(0))
            .unwrap_or(0);
        Some(total.saturating_sub(elapsed))
    }
}

/// A task that has been described but not yet submitted (no id allocated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub lock_ids: BTreeSet<String>,
    pub prerequisite_task_ids: BTreeSet<TaskId>,
    pub checkpoint_data: Option<Vec<u8>>,
    pub milliseconds_remaining: Option<u64>,
}

impl NewTask {
    /// The QUEUED record persisted on submission.
    pub fn into_record(self, task_id: TaskId) -> TaskInfo {
        TaskInfo {
            task_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            state: TaskState::Queued,
            lock_ids: self.lock_ids,
            prerequisite_task_ids: self.prerequisite_task_ids,
            owner: Some(OwnerRef::Unowned),
            checkpoint_data: self.checkpoint_data,
            error_message: None,
            error_id: None,
            stack_trace: None,
            start_time: None,
            end_time: None,
            run_count: 0,
            milliseconds_remaining: self.milliseconds_remaining,
            interval_started_at: None,
            canceled_by: None,
        }
    }
}

/// Fluent description of a task, obtained from `TaskScheduler::create_task`.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task: NewTask,
}

impl TaskBuilder {
    pub fn new(entity_type: impl Into<EntityType>, entity_id: impl Into<String>) -> Self {
        Self {
            task: NewTask {
                entity_type: entity_type.into(),
                entity_id: entity_id.into(),
                lock_ids: BTreeSet::new(),
                prerequisite_task_ids: BTreeSet::new(),
                checkpoint_data: None,
                milliseconds_remaining: None,
            },
        }
    }

    pub fn checkpoint_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.task.checkpoint_data = Some(data.into());
        self
    }

    pub fn lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.task.lock_ids.insert(lock_id.into());
        self
    }

    pub fn lock_ids<I, S>(mut self, lock_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task.lock_ids.extend(lock_ids.into_iter().map(Into::into));
        self
    }

    pub fn prerequisite(mut self, task_id: TaskId) -> Self {
        self.task.prerequisite_task_ids.insert(task_id);
        self
    }

    pub fn prerequisite_task_ids(mut self, task_ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.task.prerequisite_task_ids.extend(task_ids);
        self
    }

    pub fn milliseconds_remaining(mut self, ms: u64) -> Self {
        self.task.milliseconds_remaining = Some(ms);
        self
    }

    pub fn build(self) -> NewTask {
        self.task
    }
}
