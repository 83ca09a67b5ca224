//! Broker provider abstraction: enum dispatch, no `dyn` trait objects on the
//! hot path (mirrors `MessagingProvider`'s rationale — consistency with the
//! router's enum dispatch and no vtable overhead).

use crate::error::SwitchboardResult;
use crate::messaging::envelope::{BrokerMessage, QueueName, QueuedMessage, QueueStats, ReceiptHandle};
use crate::messaging::in_memory::InMemoryBroker;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "postgres")]
use crate::messaging::pgmq::PgmqBroker;

/// Operations every broker backend must provide.
#[async_trait]
pub trait BrokerProvider: Send + Sync + std::fmt::Debug {
    async fn ensure_queue(&self, queue: QueueName) -> SwitchboardResult<()>;

    async fn send_message(&self, queue: QueueName, message: &BrokerMessage) -> SwitchboardResult<()>;

    async fn receive_messages(
        &self,
        queue: QueueName,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> SwitchboardResult<Vec<QueuedMessage<BrokerMessage>>>;

    async fn ack_message(&self, queue: QueueName, receipt_handle: &ReceiptHandle) -> SwitchboardResult<()>;

    async fn nack_message(
        &self,
        queue: QueueName,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> SwitchboardResult<()>;

    async fn queue_stats(&self, queue: QueueName) -> SwitchboardResult<QueueStats>;

    async fn health_check(&self) -> SwitchboardResult<bool>;

    fn provider_name(&self) -> &'static str;
}

/// Enum dispatch over broker backends. `InMemory` is always available;
/// `Pgmq` is gated behind the `postgres` feature so the default build has
/// no database dependency.
#[derive(Debug)]
pub enum BrokerProviderKind {
    InMemory(InMemoryBroker),
    #[cfg(feature = "postgres")]
    Pgmq(PgmqBroker),
}

impl BrokerProviderKind {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryBroker::new())
    }

    #[cfg(feature = "postgres")]
    pub async fn new_pgmq(database_url: &str) -> SwitchboardResult<Self> {
        Ok(Self::Pgmq(PgmqBroker::connect(database_url).await?))
    }

    pub async fn ensure_queue(&self, queue: QueueName) -> SwitchboardResult<()> {
        match self {
            Self::InMemory(p) => p.ensure_queue(queue).await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.ensure_queue(queue).await,
        }
    }

    pub async fn send_message(&self, queue: QueueName, message: &BrokerMessage) -> SwitchboardResult<()> {
        match self {
            Self::InMemory(p) => p.send_message(queue, message).await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.send_message(queue, message).await,
        }
    }

    pub async fn receive_messages(
        &self,
        queue: QueueName,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> SwitchboardResult<Vec<QueuedMessage<BrokerMessage>>> {
        match self {
            Self::InMemory(p) => p.receive_messages(queue, max_messages, visibility_timeout).await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.receive_messages(queue, max_messages, visibility_timeout).await,
        }
    }

    pub async fn ack_message(&self, queue: QueueName, receipt_handle: &ReceiptHandle) -> SwitchboardResult<()> {
        match self {
            Self::InMemory(p) => p.ack_message(queue, receipt_handle).await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.ack_message(queue, receipt_handle).await,
        }
    }

    pub async fn nack_message(
        &self,
        queue: QueueName,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> SwitchboardResult<()> {
        match self {
            Self::InMemory(p) => p.nack_message(queue, receipt_handle, requeue).await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.nack_message(queue, receipt_handle, requeue).await,
        }
    }

    pub async fn queue_stats(&self, queue: QueueName) -> SwitchboardResult<QueueStats> {
        match self {
            Self::InMemory(p) => p.queue_stats(queue).await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.queue_stats(queue).await,
        }
    }

    pub async fn health_check(&self) -> SwitchboardResult<bool> {
        match self {
            Self::InMemory(p) => p.health_check().await,
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.health_check().await,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(p) => p.provider_name(),
            #[cfg(feature = "postgres")]
            Self::Pgmq(p) => p.provider_name(),
        }
    }
}

impl Default for BrokerProviderKind {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_is_in_memory() {
        let provider = BrokerProviderKind::default();
        assert_eq!(provider.provider_name(), "in_memory");
    }
}
