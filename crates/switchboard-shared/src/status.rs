//! `TaskStatus`, `TaskStepResult`, `UserConfirmation` (spec §3).

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is one of the four terminal states (spec §7: "no
    /// terminal state is skipped; no two terminal states are emitted for
    /// the same step").
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut | TaskStatus::Cancelled
        )
    }
}

/// Result of one executed step, persisted by the Result Persister (C9).
///
/// Invariant (spec §3): when `completed == false`, `status` must be one of
/// `{Failed, TimedOut, Cancelled}` and `error_code` must be set. This is
/// enforced by the constructors below rather than at the field level, since
/// `serde(deny_unknown_fields)` alone can't express the cross-field rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStepResult {
    pub step: String,
    pub result: Option<serde_json::Value>,
    pub completed: bool,
    pub message: String,
    pub status: TaskStatus,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl TaskStepResult {
    /// Build a successful, completed step result.
    pub fn success(step: impl Into<String>, result: serde_json::Value, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            result: Some(result),
            completed: true,
            message: message.into(),
            status: TaskStatus::Completed,
            error_code: None,
            error_message: None,
        }
    }

    /// Build a failed step result. `status` must be one of the three
    /// non-completed terminal states; panics (a programmer error, not a
    /// runtime one) if given `Completed`, `Pending`, or `Running`.
    pub fn failure(
        step: impl Into<String>,
        status: TaskStatus,
        error_code: ErrorCode,
        error_message: impl Into<String>,
    ) -> Self {
        assert!(
            matches!(
                status,
                TaskStatus::Failed | TaskStatus::TimedOut | TaskStatus::Cancelled
            ),
            "a non-completed TaskStepResult must carry one of Failed/TimedOut/Cancelled"
        );
        let error_message = error_message.into();
        Self {
            step: step.into(),
            result: None,
            completed: false,
            message: error_message.clone(),
            status,
            error_code: Some(error_code),
            error_message: Some(error_message),
        }
    }

    pub fn is_valid(&self) -> bool {
        if self.completed {
            true
        } else {
            self.status.is_terminal() && self.status != TaskStatus::Completed && self.error_code.is_some()
        }
    }
}

/// Response to a blocked confirmation step (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfirmation {
    pub proceed: bool,
    pub feedback: Option<String>,
}

impl UserConfirmation {
    pub fn proceed(feedback: Option<String>) -> Self {
        Self {
            proceed: true,
            feedback,
        }
    }

    pub fn deny(feedback: Option<String>) -> Self {
        Self {
            proceed: false,
            feedback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::TimedOut.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn success_result_is_valid() {
        let r = TaskStepResult::success("s1", serde_json::json!({"x": 1}), "ok");
        assert!(r.is_valid());
        assert!(r.completed);
    }

    #[test]
    fn failure_result_is_valid() {
        let r = TaskStepResult::failure("s1", TaskStatus::Failed, ErrorCode::NotFound, "missing");
        assert!(r.is_valid());
        assert!(!r.completed);
        assert_eq!(r.error_code, Some(ErrorCode::NotFound));
    }

    #[test]
    #[should_panic]
    fn failure_result_rejects_completed_status() {
        TaskStepResult::failure("s1", TaskStatus::Completed, ErrorCode::Internal, "oops");
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }
}
