//! Domain-level broker facade (C5/C6), wrapping `BrokerProviderKind` (enum
//! dispatch, no trait objects) with optional circuit breaker protection —
//! same shape as the teacher's `MessageClient`.

use crate::error::{SwitchboardError, SwitchboardResult};
use crate::messaging::envelope::{BrokerMessage, QueueName, QueuedMessage, QueueStats, ReceiptHandle};
use crate::messaging::provider::BrokerProviderKind;
use crate::resilience::{CircuitBreaker, CircuitBreakerBehavior};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BrokerClient {
    provider: Arc<BrokerProviderKind>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl BrokerClient {
    pub fn new(provider: Arc<BrokerProviderKind>) -> Self {
        Self {
            provider,
            circuit_breaker: None,
        }
    }

    pub fn with_circuit_breaker(provider: Arc<BrokerProviderKind>, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            provider,
            circuit_breaker: Some(circuit_breaker),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    async fn with_breaker<F, T, Fut>(&self, op: F) -> SwitchboardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = SwitchboardResult<T>>,
    {
        let Some(cb) = &self.circuit_breaker else {
            return op().await;
        };
        if !cb.should_allow() {
            return Err(SwitchboardError::Messaging(format!(
                "circuit breaker {:?} is open",
                cb.name()
            )));
        }
        let start = Instant::now();
        let result = op().await;
        match &result {
            Ok(_) => cb.record_success(start.elapsed()),
            Err(_) => cb.record_failure(start.elapsed()),
        }
        result
    }

    /// Send a task message, routed to `fast_tasks`/`heavy_tasks` by
    /// `message.task_name` (PROTECTED — counts toward circuit breaker state).
    pub async fn send_task_message(&self, message: BrokerMessage) -> SwitchboardResult<()> {
        let queue = message.queue()?;
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.send_message(queue, &message).await })
            .await
    }

    /// Receive messages from a named lane (PROTECTED).
    pub async fn receive_messages(
        &self,
        queue: QueueName,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> SwitchboardResult<Vec<QueuedMessage<BrokerMessage>>> {
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.receive_messages(queue, max_messages, visibility_timeout).await })
            .await
    }

    /// Acknowledge a processed message (UNPROTECTED — safe to fail, causes redelivery).
    pub async fn ack_message(&self, queue: QueueName, receipt_handle: &ReceiptHandle) -> SwitchboardResult<()> {
        self.provider.ack_message(queue, receipt_handle).await
    }

    /// Negative-acknowledge a message, optionally requeuing (UNPROTECTED).
    pub async fn nack_message(
        &self,
        queue: QueueName,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> SwitchboardResult<()> {
        self.provider.nack_message(queue, receipt_handle, requeue).await
    }

    /// Ensure both named lanes exist (UNPROTECTED — admin/startup op).
    pub async fn ensure_queues(&self) -> SwitchboardResult<()> {
        self.provider.ensure_queue(QueueName::FastTasks).await?;
        self.provider.ensure_queue(QueueName::HeavyTasks).await?;
        Ok(())
    }

    /// Observability — must work even when the breaker is open.
    pub async fn queue_stats(&self, queue: QueueName) -> SwitchboardResult<QueueStats> {
        self.provider.queue_stats(queue).await
    }

    pub async fn health_check(&self) -> SwitchboardResult<bool> {
        self.provider.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerSettings;
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

    fn client() -> BrokerClient {
        BrokerClient::new(Arc::new(BrokerProviderKind::new_in_memory()))
    }

    fn client_with_breaker() -> (BrokerClient, Arc<CircuitBreaker>) {
        let breaker = Arc::new(CircuitBreaker::new(
            "broker",
            CircuitBreakerSettings {
                failure_threshold: 1,
                success_threshold: 1,
                open_timeout_seconds: 60,
            },
        ));
        let client = BrokerClient::with_circuit_breaker(Arc::new(BrokerProviderKind::new_in_memory()), breaker.clone());
        (client, breaker)
    }

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let client = client();
        client.ensure_queues().await.unwrap();
        client.send_task_message(message("execute_task")).await.unwrap();

        let messages = client
            .receive_messages(QueueName::FastTasks, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.task_id, "t1");
    }

    #[tokio::test]
    async fn send_rejected_when_breaker_open() {
        let (client, breaker) = client_with_breaker();
        breaker.force_open();

        let result = client.send_task_message(message("execute_task")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_bypasses_breaker() {
        let (client, breaker) = client_with_breaker();
        breaker.force_open();
        assert!(client.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn no_breaker_passthrough() {
        let client = client();
        assert!(client.circuit_breaker().is_none());
        client.ensure_queues().await.unwrap();
        assert!(client.send_task_message(message("execute_task")).await.is_ok());
    }
}
