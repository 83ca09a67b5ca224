//! Dependency-free in-memory broker (mirrors `MessagingProvider::new_in_memory()`):
//! the default provider for local development and the one every unit/seed-scenario
//! test in this workspace runs against.

use crate::error::SwitchboardResult;
use crate::messaging::envelope::{BrokerMessage, QueueName, QueuedMessage, QueueStats, ReceiptHandle};
use crate::messaging::provider::BrokerProvider;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    message: BrokerMessage,
    receive_count: u32,
}

/// In-process broker backed by per-queue `VecDeque`s. Visibility timeouts
/// are not enforced (there is no redelivery clock) — a received message
/// stays in flight until `ack_message` or `nack_message` resolves it.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    ready: DashMap<QueueName, VecDeque<Entry>>,
    in_flight: DashMap<u64, (QueueName, Entry)>,
    next_id: AtomicU64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            ready: DashMap::new(),
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl BrokerProvider for InMemoryBroker {
    async fn ensure_queue(&self, queue: QueueName) -> SwitchboardResult<()> {
        self.ready.entry(queue).or_default();
        Ok(())
    }

    async fn send_message(&self, queue: QueueName, message: &BrokerMessage) -> SwitchboardResult<()> {
        self.ready.entry(queue).or_default().push_back(Entry {
            message: message.clone(),
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive_messages(
        &self,
        queue: QueueName,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> SwitchboardResult<Vec<QueuedMessage<BrokerMessage>>> {
        let mut out = Vec::with_capacity(max_messages);
        let mut ready = self.ready.entry(queue).or_default();
        for _ in 0..max_messages {
            let Some(mut entry) = ready.pop_front() else {
                break;
            };
            entry.receive_count += 1;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let receive_count = entry.receive_count;
            let message = entry.message.clone();
            self.in_flight.insert(id, (queue, entry));
            out.push(QueuedMessage {
                message,
                receipt_handle: ReceiptHandle::InMemory(id),
                receive_count,
            });
        }
        Ok(out)
    }

    async fn ack_message(&self, _queue: QueueName, receipt_handle: &ReceiptHandle) -> SwitchboardResult<()> {
        if let ReceiptHandle::InMemory(id) = receipt_handle {
            self.in_flight.remove(id);
        }
        Ok(())
    }

    async fn nack_message(
        &self,
        _queue: QueueName,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> SwitchboardResult<()> {
        if let ReceiptHandle::InMemory(id) = receipt_handle {
            if let Some((_, (queue, entry))) = self.in_flight.remove(id) {
                if requeue {
                    self.ready.entry(queue).or_default().push_front(entry);
                }
            }
        }
        Ok(())
    }

    async fn queue_stats(&self, queue: QueueName) -> SwitchboardResult<QueueStats> {
        let count = self.ready.get(&queue).map(|q| q.len()).unwrap_or(0) as u64;
        Ok(QueueStats::new(queue.as_str(), count))
    }

    async fn health_check(&self) -> SwitchboardResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;

    fn message(task_name: &str) -> BrokerMessage {
        BrokerMessage {
            task_name: task_name.to_string(),
            user_id: "u1".to_string(),
            task_id: "t1".to_string(),
            step: 1,
            mode: "chat".to_string(),
            service: "text_analyzer".to_string(),
            method: "analyze_text".to_string(),
            input_data: serde_json::json!({"text": "hello"}),
            context: TaskContext::new("u1", "t1", None, None).unwrap(),
        }
    }

    #[tokio::test]
    async fn send_then_receive_round_trips() {
        let broker = InMemoryBroker::new();
        broker.ensure_queue(QueueName::FastTasks).await.unwrap();
        broker
            .send_message(QueueName::FastTasks, &message("execute_task"))
            .await
            .unwrap();

        let messages = broker
            .receive_messages(QueueName::FastTasks, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.task_id, "t1");
        assert_eq!(messages[0].receive_count, 1);
    }

    #[tokio::test]
    async fn ack_removes_in_flight_message() {
        let broker = InMemoryBroker::new();
        broker
            .send_message(QueueName::FastTasks, &message("execute_task"))
            .await
            .unwrap();
        let messages = broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(30))
            .await
            .unwrap();
        broker
            .ack_message(QueueName::FastTasks, &messages[0].receipt_handle)
            .await
            .unwrap();
        assert_eq!(broker.in_flight.len(), 0);
    }

    #[tokio::test]
    async fn nack_with_requeue_makes_message_visible_again() {
        let broker = InMemoryBroker::new();
        broker
            .send_message(QueueName::FastTasks, &message("execute_task"))
            .await
            .unwrap();
        let messages = broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(30))
            .await
            .unwrap();
        broker
            .nack_message(QueueName::FastTasks, &messages[0].receipt_handle, true)
            .await
            .unwrap();

        let redelivered = broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].receive_count, 2);
    }

    #[tokio::test]
    async fn nack_without_requeue_discards_message() {
        let broker = InMemoryBroker::new();
        broker
            .send_message(QueueName::FastTasks, &message("execute_task"))
            .await
            .unwrap();
        let messages = broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(30))
            .await
            .unwrap();
        broker
            .nack_message(QueueName::FastTasks, &messages[0].receipt_handle, false)
            .await
            .unwrap();

        let stats = broker.queue_stats(QueueName::FastTasks).await.unwrap();
        assert_eq!(stats.message_count, 0);
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let broker = InMemoryBroker::new();
        broker
            .send_message(QueueName::FastTasks, &message("execute_task"))
            .await
            .unwrap();
        let heavy_stats = broker.queue_stats(QueueName::HeavyTasks).await.unwrap();
        assert_eq!(heavy_stats.message_count, 0);
    }
}
