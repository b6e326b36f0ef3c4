use tokio_util::sync::CancellationToken;

use crate::domain::TaskInfo;

/// What a handler gets for one run: the task as claimed, plus a token that
/// fires if the lease it runs under fails.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task: TaskInfo,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(task: TaskInfo, cancel: CancellationToken) -> Self {
        Self { task, cancel }
    }

    pub fn task(&self) -> &TaskInfo {
        &self.task
    }

    /// Take the task, typically to modify it and return it as a requeue.
    pub fn into_task(self) -> TaskInfo {
        self.task
    }

    pub fn checkpoint_str(&self) -> Option<&str> {
        self.task.checkpoint_str()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves when the lease is lost. Useful in `select!` around long waits.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
