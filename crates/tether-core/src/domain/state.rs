//! State - タスクの状態
//!
//! ```text
//!            claim                 try_acquire_all ok
//! QUEUED ──────────► RUNNING ───────────────────────► (handler)
//!   ▲                  │ blocked / delay                 │
//!   │ wake / timer     ▼                                 ▼
//!   └──── WAITING_FOR_{LOCK,PREREQUISITE,INTERVAL}   SUCCESS | FAILED | CANCELED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    WaitingForInterval,
    WaitingForPrerequisite,
    WaitingForLock,
    Failed,
    Success,
    Canceled,
}

impl TaskState {
    /// 終端状態。以降は再投入しない限り不変。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Success | Self::Canceled)
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            Self::WaitingForInterval | Self::WaitingForPrerequisite | Self::WaitingForLock
        )
    }

    /// States a worker may claim (move to RUNNING) from.
    pub fn is_claimable(self) -> bool {
        self == Self::Queued || self.is_waiting()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::WaitingForInterval => "WAITING_FOR_INTERVAL",
            Self::WaitingForPrerequisite => "WAITING_FOR_PREREQUISITE",
            Self::WaitingForLock => "WAITING_FOR_LOCK",
            Self::Failed => "FAILED",
            Self::Success => "SUCCESS",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::queued(TaskState::Queued, false, true)]
    #[case::running(TaskState::Running, false, false)]
    #[case::interval(TaskState::WaitingForInterval, false, true)]
    #[case::prerequisite(TaskState::WaitingForPrerequisite, false, true)]
    #[case::lock(TaskState::WaitingForLock, false, true)]
    #[case::failed(TaskState::Failed, true, false)]
    #[case::success(TaskState::Success, true, false)]
    #[case::canceled(TaskState::Canceled, true, false)]
    fn classifies_states(#[case] state: TaskState, #[case] terminal: bool, #[case] claimable: bool) {
        assert_eq!(state.is_terminal(), terminal);
        assert_eq!(state.is_claimable(), claimable);
    }

    #[test]
    fn serde_form_matches_as_str() {
        let value = serde_json::to_value(TaskState::WaitingForPrerequisite).unwrap();
        assert_eq!(value, serde_json::json!(TaskState::WaitingForPrerequisite.as_str()));
    }
}
