//! Client-facing WebSocket wire types (spec §6).

use serde::{Deserialize, Serialize};
use switchboard_shared::status::TaskStatus;

/// The `type` discriminant of a server→client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusEventType {
    TaskStepResult,
    SystemNotification,
    TaskProgress,
    Heartbeat,
}

/// A server→client event (spec §6 envelope).
///
/// `r#type` is renamed to the wire field `type` since it's a Rust keyword.
/// `timestamp` is epoch-milliseconds, matching the wire format exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: BusEventType,
    pub user_id: String,
    pub task_id: String,
    pub step: i64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    pub timestamp: i64,
    /// Set by the worker when the result persister failed to durably
    /// record this step (spec §4.9/§7: "logged but MUST NOT fail the
    /// task... the worker instead records `persistence_degraded: true`").
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub persistence_degraded: bool,
}

fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl BusEvent {
    /// A `task_step_result` event carrying a confirmation request —
    /// `callback_id` is populated, `status` is the step's current status
    /// (typically `Running`, since the step hasn't resolved yet).
    #[allow(clippy::too_many_arguments)]
    pub fn confirmation_request(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        step: i64,
        status: TaskStatus,
        task: impl Into<String>,
        message: impl Into<String>,
        callback_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: BusEventType::TaskStepResult,
            user_id: user_id.into(),
            task_id: task_id.into(),
            step,
            status,
            task: Some(task.into()),
            message: message.into(),
            result: None,
            error: None,
            callback_id: Some(callback_id.into()),
            timestamp: now_epoch_ms(),
            persistence_degraded: false,
        }
    }

    /// A `task_step_result` lifecycle event (running/completed/failed/...).
    #[allow(clippy::too_many_arguments)]
    pub fn step_result(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        step: i64,
        status: TaskStatus,
        task: impl Into<String>,
        message: impl Into<String>,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Self {
        Self {
            event_type: BusEventType::TaskStepResult,
            user_id: user_id.into(),
            task_id: task_id.into(),
            step,
            status,
            task: Some(task.into()),
            message: message.into(),
            result,
            error,
            callback_id: None,
            timestamp: now_epoch_ms(),
            persistence_degraded: false,
        }
    }

    pub fn system_notification(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: BusEventType::SystemNotification,
            user_id: user_id.into(),
            task_id: task_id.into(),
            step: 0,
            status: TaskStatus::Running,
            task: None,
            message: message.into(),
            result: None,
            error: None,
            callback_id: None,
            timestamp: now_epoch_ms(),
            persistence_degraded: false,
        }
    }

    pub fn task_progress(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        step: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: BusEventType::TaskProgress,
            user_id: user_id.into(),
            task_id: task_id.into(),
            step,
            status: TaskStatus::Running,
            task: None,
            message: message.into(),
            result: None,
            error: None,
            callback_id: None,
            timestamp: now_epoch_ms(),
            persistence_degraded: false,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            event_type: BusEventType::Heartbeat,
            user_id: String::new(),
            task_id: String::new(),
            step: 0,
            status: TaskStatus::Running,
            task: None,
            message: "ping".to_string(),
            result: None,
            error: None,
            callback_id: None,
            timestamp: now_epoch_ms(),
            persistence_degraded: false,
        }
    }

    /// Mark a step result event as persisted in a degraded state (spec
    /// §4.9/§7).
    pub fn with_persistence_degraded(mut self) -> Self {
        self.persistence_degraded = true;
        self
    }
}

/// The `action` discriminant of a client→server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAction {
    Confirm,
    Cancel,
    Ping,
    Subscribe,
}

/// A client→server message (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ClientAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proceed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// A malformed message or unrecognised action, per spec §6:
/// `{"error": "Unknown action: <x>"}` / `{"error": "Invalid JSON format"}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn invalid_json() -> Self {
        Self {
            error: "Invalid JSON format".to_string(),
        }
    }

    pub fn unknown_action(action: &str) -> Self {
        Self {
            error: format!("Unknown action: {action}"),
        }
    }

    pub fn at_capacity() -> Self {
        Self {
            error: "Connection refused: max_connections reached".to_string(),
        }
    }
}
