use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::domain::{EntityType, LeaseId, TaskId};
use crate::ports::StoreError;

/// Errors raised by the scheduler, the lock coordinator and the lease manager.
///
/// None of these are surfaced to the submitter of a task once it has been
/// accepted: execution is asynchronous and callers poll `get_task`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A conditional write lost a race. Always recoverable: the caller either
    /// aborts silently or retries a bounded number of times.
    #[error("conditional write lost a race: {0}")]
    Conflict(String),

    /// The lease this participant acts under is no longer valid. The current
    /// attempt is abandoned without further persistence; the reaper repairs it.
    #[error("lease {0} is no longer valid")]
    LostLease(LeaseId),

    /// No handler registered for the entity type. The task goes back to QUEUED.
    #[error("handler not found for entity_type={0}")]
    HandlerNotFound(EntityType),

    /// The participant stopped monitoring; no new lease is created until it
    /// starts again.
    #[error("lease manager is closed")]
    Closed,

    #[error("duplicate handler for entity_type={0}")]
    DuplicateHandler(EntityType),

    #[error("{0} not found")]
    TaskNotFound(TaskId),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("prerequisite cycle: {0:?}")]
    PrerequisiteCycle(Vec<TaskId>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("record codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// The error a task handler returns. It ends the task in FAILED with the
/// message, a fresh error id and the error's source chain persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
    stack_trace: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Capture an arbitrary error together with its `source()` chain.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut trace = format!("{err:?}");
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack_trace: Some(trace),
        }
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl StdError for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: std::io::Error,
    }

    #[test]
    fn handler_error_captures_source_chain() {
        let err = Outer {
            inner: std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        };
        let handler_err = HandlerError::from_error(&err);

        assert_eq!(handler_err.message(), "outer failure");
        let trace = handler_err.stack_trace().unwrap();
        assert!(trace.contains("caused by: disk gone"));
    }

    #[test]
    fn conflict_message_mentions_race() {
        let err = SchedulerError::Conflict("claim task-7".to_string());
        assert!(err.to_string().contains("lost a race"));
    }
}
