//! Broker message envelope and queue routing (C5, spec §4.5/§6).

use crate::context::TaskContext;
use crate::error::{SwitchboardError, SwitchboardResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One of the two named lanes. Routing is static by task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    FastTasks,
    HeavyTasks,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::FastTasks => "fast_tasks",
            QueueName::HeavyTasks => "heavy_tasks",
        }
    }

    /// Static routing table: `execute_task` → fast, `execute_heavy_task` → heavy.
    pub fn for_task_name(task_name: &str) -> SwitchboardResult<Self> {
        match task_name {
            "execute_task" => Ok(QueueName::FastTasks),
            "execute_heavy_task" => Ok(QueueName::HeavyTasks),
            other => Err(SwitchboardError::InvalidParameter(format!(
                "no routing rule for task_name {other:?}; expected execute_task or execute_heavy_task"
            ))),
        }
    }
}

/// Wire layout of a broker message (spec §6: `task_name`, `user_id`,
/// `task_id`, `step`, `mode`, `service`, `input_data`, `context`).
///
/// `task_name` is the queue-routing discriminator (`execute_task` /
/// `execute_heavy_task`, per [`QueueName::for_task_name`]); `method` is the
/// dispatcher's C7 `task_name` input (the specific callable to invoke on
/// `service`, e.g. `analyze_text`) — kept as a distinct field so routing
/// and dispatch never share a string with two meanings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub task_name: String,
    pub user_id: String,
    pub task_id: String,
    pub step: i64,
    pub mode: String,
    pub service: String,
    pub method: String,
    pub input_data: serde_json::Value,
    pub context: TaskContext,
}

impl BrokerMessage {
    pub fn queue(&self) -> SwitchboardResult<QueueName> {
        QueueName::for_task_name(&self.task_name)
    }
}

/// Opaque handle identifying a received-but-unacknowledged message. Its
/// concrete shape is provider-specific; callers treat it as a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptHandle {
    InMemory(u64),
    #[cfg(feature = "postgres")]
    Pgmq(i64),
}

/// A message paired with delivery metadata, as returned from `receive_messages`.
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub message: T,
    pub receipt_handle: ReceiptHandle,
    pub receive_count: u32,
}

/// Lightweight observability snapshot for a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub message_count: u64,
    pub oldest_message_age: Option<Duration>,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            oldest_message_age: None,
        }
    }
}
