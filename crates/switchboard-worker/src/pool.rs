//! Worker Pool (C6): consumes one named queue, invokes the Dispatcher (C7),
//! persists via C9, publishes lifecycle events via the Progress Bus (C4),
//! and retries retryable failures with exponential backoff (C10).
//!
//! Grounded on the teacher's event-driven processor shape (a config struct,
//! an `is_running` flag, `Duration`-based timing fields) and on
//! `CircuitBreaker`'s role wrapping a flaky collaborator — here the
//! dispatcher's service invocation rather than a broker send.

use crate::metrics::{MemorySampler, MetricsSink, TaskMetric, TracingMetricsSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_bus::{BusEvent, ProgressBus};
use switchboard_executor::ResultPersister;
use switchboard_registry::Dispatcher;
use switchboard_shared::config::{DeadlineSettings, RetrySettings, WorkerSettings};
use switchboard_shared::error::{ErrorCode, SwitchboardError};
use switchboard_shared::messaging::{BrokerClient, BrokerMessage, QueueName, QueuedMessage, ReceiptHandle};
use switchboard_shared::resilience::{backoff_delay, CircuitBreaker, CircuitBreakerBehavior};
use switchboard_shared::status::{TaskStatus, TaskStepResult};
use tracing::{debug, warn};

/// Consumes `queue` with `concurrency` concurrent workers.
pub struct WorkerPool {
    queue: QueueName,
    broker: Arc<BrokerClient>,
    dispatcher: Arc<Dispatcher>,
    persister: Arc<ResultPersister>,
    bus: Option<Arc<ProgressBus>>,
    dispatch_breaker: Option<Arc<CircuitBreaker>>,
    retry: RetrySettings,
    deadline: DeadlineSettings,
    concurrency: usize,
    poll_interval: Duration,
    metrics: Arc<dyn MetricsSink>,
    memory_sampler: Option<Arc<MemorySampler>>,
    stopping: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue", &self.queue)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        queue: QueueName,
        broker: Arc<BrokerClient>,
        dispatcher: Arc<Dispatcher>,
        persister: Arc<ResultPersister>,
        worker: &WorkerSettings,
        retry: RetrySettings,
        deadline: DeadlineSettings,
    ) -> Self {
        let memory_sampler = worker.sample_memory.then(|| Arc::new(MemorySampler::new()));
        Self {
            queue,
            broker,
            dispatcher,
            persister,
            bus: None,
            dispatch_breaker: None,
            retry,
            deadline,
            concurrency: worker.concurrency,
            poll_interval: Duration::from_millis(worker.poll_interval_ms),
            metrics: Arc::new(TracingMetricsSink),
            memory_sampler,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_bus(mut self, bus: Arc<ProgressBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_dispatch_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.dispatch_breaker = Some(breaker);
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Spawn `concurrency` worker loops and return a handle to drain them.
    pub fn spawn(self: Arc<Self>) -> WorkerPoolHandle {
        let handles = (0..self.concurrency)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_loop(worker_id).await })
            })
            .collect();
        WorkerPoolHandle {
            stopping: self.stopping.clone(),
            handles,
        }
    }

    async fn run_loop(self: Arc<Self>, worker_id: usize) {
        debug!(queue = self.queue.as_str(), worker_id, "worker started");
        while !self.stopping.load(Ordering::SeqCst) {
            match self.broker.receive_messages(self.queue, 1, self.deadline.hard()).await {
                Ok(mut messages) if !messages.is_empty() => {
                    let queued = messages.remove(0);
                    self.process_one(queued).await;
                }
                Ok(_) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    warn!(queue = self.queue.as_str(), worker_id, error = %err, "queue receive failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        debug!(queue = self.queue.as_str(), worker_id, "worker stopped");
    }

    fn is_cancelled(&self, task_id: &str) -> bool {
        self.bus.as_ref().is_some_and(|bus| bus.is_cancelled(task_id))
    }

    fn publish(&self, message: &BrokerMessage, task: &str, result: &TaskStepResult, persistence_degraded: bool) {
        if let Some(bus) = &self.bus {
            let mut event = BusEvent::step_result(
                &message.user_id,
                &message.task_id,
                message.step,
                result.status,
                task,
                result.message.clone(),
                result.result.clone(),
                result.error_message.clone(),
            );
            if persistence_degraded {
                event = event.with_persistence_degraded();
            }
            bus.send_to_user(&message.user_id, event);
        }
    }

    fn sample_memory(&self) -> Option<u64> {
        self.memory_sampler.as_ref().and_then(|sampler| sampler.sample())
    }

    /// Exceptions never escape this function — every error path is caught,
    /// classified, and turned into a terminal `TaskStepResult` (spec §4.6).
    async fn process_one(&self, queued: QueuedMessage<BrokerMessage>) {
        let message = queued.message;
        let task = format!("{}.{}", message.service, message.method);
        let start = Instant::now();

        self.publish(
            &message,
            &task,
            &TaskStepResult {
                step: task.clone(),
                result: None,
                completed: false,
                message: "running".to_string(),
                status: TaskStatus::Running,
                error_code: None,
                error_message: None,
            },
            false,
        );

        let mut memory_peak = self.sample_memory();

        let outcome = if self.is_cancelled(&message.task_id) {
            Self::cancelled_result(&task)
        } else {
            self.dispatch_with_retry(&message, &task, &mut memory_peak).await
        };

        self.metrics.record(TaskMetric {
            queue: self.queue,
            success: outcome.completed,
            duration: start.elapsed(),
            memory_peak_bytes: memory_peak,
        });

        self.finish(&message, &queued.receipt_handle, &task, outcome).await;
    }

    fn cancelled_result(task: &str) -> TaskStepResult {
        TaskStepResult::failure(task.to_string(), TaskStatus::Cancelled, ErrorCode::Cancelled, "task was cancelled")
    }

    async fn dispatch_with_retry(&self, message: &BrokerMessage, task: &str, memory_peak: &mut Option<u64>) -> TaskStepResult {
        let mut attempt = 0;
        loop {
            if self.is_cancelled(&message.task_id) {
                return Self::cancelled_result(task);
            }

            let result = self.dispatch_once(message, task).await;
            if let Some(sample) = self.sample_memory() {
                *memory_peak = Some(memory_peak.unwrap_or(0).max(sample));
            }

            let retryable = result.error_code.is_some_and(|code| code.is_retryable());
            if result.completed || !retryable || attempt + 1 >= self.retry.max_attempts {
                return result;
            }

            let delay = backoff_delay(&self.retry, attempt);
            attempt += 1;
            debug!(
                task_id = %message.task_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying dispatch after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One dispatch attempt, bounded by the soft/hard deadlines. The soft
    /// deadline signals cooperative cancellation via the bus; the hard
    /// deadline aborts the spawned dispatch task outright and records
    /// `TIMED_OUT` (spec §5, "Timeouts").
    async fn dispatch_once(&self, message: &BrokerMessage, task: &str) -> TaskStepResult {
        if let Some(breaker) = &self.dispatch_breaker {
            if !breaker.should_allow() {
                return TaskStepResult::failure(
                    task.to_string(),
                    TaskStatus::Failed,
                    ErrorCode::Unavailable,
                    format!("circuit breaker {:?} is open", breaker.name()),
                );
            }
        }

        let dispatcher = self.dispatcher.clone();
        let mode = message.mode.clone();
        let service = message.service.clone();
        let method = message.method.clone();
        let input_data = message.input_data.clone();
        let context = message.context.clone();
        let call_start = Instant::now();
        let mut handle =
            tokio::spawn(async move { dispatcher.dispatch(&mode, &service, &method, input_data, &context).await });

        let soft_sleep = tokio::time::sleep(self.deadline.soft());
        let hard_sleep = tokio::time::sleep(self.deadline.hard());
        tokio::pin!(soft_sleep);
        tokio::pin!(hard_sleep);
        let mut soft_fired = false;

        let step_result = loop {
            tokio::select! {
                res = &mut handle => break Self::map_dispatch_result(res, task),
                _ = &mut soft_sleep, if !soft_fired => {
                    soft_fired = true;
                    if let Some(bus) = &self.bus {
                        bus.cancel_task(&message.task_id);
                    }
                    warn!(task_id = %message.task_id, "soft deadline exceeded, cancellation signalled");
                }
                _ = &mut hard_sleep => {
                    handle.abort();
                    warn!(task_id = %message.task_id, "hard deadline exceeded, dispatch aborted");
                    break TaskStepResult::failure(task.to_string(), TaskStatus::TimedOut, ErrorCode::Timeout, "hard deadline exceeded");
                }
            }
        };

        if let Some(breaker) = &self.dispatch_breaker {
            if step_result.completed {
                breaker.record_success(call_start.elapsed());
            } else {
                breaker.record_failure(call_start.elapsed());
            }
        }

        step_result
    }

    fn map_dispatch_result(
        res: Result<switchboard_shared::error::SwitchboardResult<serde_json::Value>, tokio::task::JoinError>,
        task: &str,
    ) -> TaskStepResult {
        match res {
            Ok(Ok(value)) => TaskStepResult::success(task, value, format!("{task} completed")),
            Ok(Err(SwitchboardError::Dispatch { source, .. })) => {
                TaskStepResult::failure(task, failure_status(source.code), source.code, source.message)
            }
            Ok(Err(err)) => TaskStepResult::failure(task, TaskStatus::Failed, ErrorCode::Internal, err.to_string()),
            Err(join_err) => TaskStepResult::failure(
                task,
                TaskStatus::Failed,
                ErrorCode::Internal,
                format!("worker task panicked: {join_err}"),
            ),
        }
    }

    /// Terminal handling: persist (degraded on failure, never fatal),
    /// publish, and ack the broker message. Spec §6: "Workers ack only on
    /// terminal outcome" — by the time `finish` runs, retries are exhausted
    /// or the result is already terminal, so every call here acks.
    async fn finish(&self, message: &BrokerMessage, receipt_handle: &ReceiptHandle, task: &str, result: TaskStepResult) {
        let degraded = match self.persister.persist(&message.user_id, &message.task_id, message.step, &result).await {
            Ok(()) => false,
            Err(err) => {
                warn!(
                    user_id = %message.user_id,
                    task_id = %message.task_id,
                    step = message.step,
                    error = %err,
                    "persistence_degraded"
                );
                true
            }
        };

        self.publish(message, task, &result, degraded);

        if let Err(err) = self.broker.ack_message(self.queue, receipt_handle).await {
            warn!(task_id = %message.task_id, error = %err, "failed to ack broker message");
        }
    }
}

fn failure_status(code: ErrorCode) -> TaskStatus {
    match code {
        ErrorCode::Cancelled => TaskStatus::Cancelled,
        ErrorCode::Timeout => TaskStatus::TimedOut,
        _ => TaskStatus::Failed,
    }
}

/// A handle to a spawned pool. Dropping it without calling `shutdown`
/// leaves the workers running detached — always shut down explicitly.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    stopping: Arc<AtomicBool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Stop pulling new messages and wait up to `drain` for in-flight work
    /// to finish (spec §4.6: "the broker is told not to deliver new work").
    pub async fn shutdown(self, drain: Duration) {
        self.stopping.store(true, Ordering::SeqCst);
        if tokio::time::timeout(drain, futures::future::join_all(self.handles)).await.is_err() {
            warn!("worker pool drain window elapsed with workers still in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use switchboard_registry::{HandlerTableService, ServiceRegistry};
    use switchboard_shared::context::TaskContext;
    use switchboard_shared::error::ServiceError;
    use switchboard_shared::messaging::BrokerProviderKind;

    fn message(method: &str, task_name: &str) -> BrokerMessage {
        BrokerMessage {
            task_name: task_name.to_string(),
            user_id: "u1".to_string(),
            task_id: "t1".to_string(),
            step: 0,
            mode: "chat".to_string(),
            service: "text_analyzer".to_string(),
            method: method.to_string(),
            input_data: serde_json::json!({}),
            context: TaskContext::new("u1", "t1", None, None).unwrap(),
        }
    }

    fn registry() -> Arc<ServiceRegistry> {
        let registry = ServiceRegistry::new();
        let attempts = Arc::new(AtomicU32::new(0));
        registry
            .register_instance(
                "chat",
                "text_analyzer",
                Arc::new(
                    HandlerTableService::new("text_analyzer")
                        .register("analyze_text", |_input, _ctx| async move { Ok(serde_json::json!({"sentiment": "neutral"})) })
                        .register("fail_not_found", |_input, _ctx| async move { Err(ServiceError::not_found("missing")) })
                        .register("flaky_then_succeeds", move |_input, _ctx| {
                            let attempts = attempts.clone();
                            async move {
                                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                                    Err(ServiceError::new(switchboard_shared::error::ErrorCode::Unavailable, "try again"))
                                } else {
                                    Ok(serde_json::json!({"ok": true}))
                                }
                            }
                        }),
                ),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn pool(queue: QueueName) -> Arc<WorkerPool> {
        let broker = Arc::new(BrokerClient::new(Arc::new(BrokerProviderKind::new_in_memory())));
        let dispatcher = Arc::new(Dispatcher::new(registry()));
        let persister = Arc::new(ResultPersister::in_memory());
        let worker_settings = WorkerSettings {
            concurrency: 1,
            poll_interval_ms: 5,
            sample_memory: false,
        };
        Arc::new(WorkerPool::new(
            queue,
            broker,
            dispatcher,
            persister,
            &worker_settings,
            RetrySettings {
                max_attempts: 2,
                base_delay_ms: 1,
                factor: 1.0,
                max_delay_seconds: 1,
            },
            DeadlineSettings {
                soft_seconds: 5,
                hard_seconds: 5,
            },
        ))
    }

    #[tokio::test]
    async fn successful_dispatch_acks_and_persists() {
        let pool = pool(QueueName::FastTasks);
        pool.broker.ensure_queues().await.unwrap();
        pool.broker
            .send_task_message(message("analyze_text", "execute_task"))
            .await
            .unwrap();

        let queued = pool
            .broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);
        pool.process_one(queued).await;

        let stored = pool.persister.get_step("u1", "t1", 0).await.unwrap().unwrap();
        assert!(stored.completed);

        let stats = pool.broker.queue_stats(QueueName::FastTasks).await.unwrap();
        assert_eq!(stats.message_count, 0);
    }

    #[tokio::test]
    async fn non_retryable_failure_persists_failed_status() {
        let pool = pool(QueueName::FastTasks);
        pool.broker.ensure_queues().await.unwrap();
        pool.broker
            .send_task_message(message("fail_not_found", "execute_task"))
            .await
            .unwrap();

        let queued = pool
            .broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);
        pool.process_one(queued).await;

        let stored = pool.persister.get_step("u1", "t1", 0).await.unwrap().unwrap();
        assert!(!stored.completed);
        assert_eq!(stored.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn retryable_failure_succeeds_on_second_attempt() {
        let pool = pool(QueueName::FastTasks);
        pool.broker.ensure_queues().await.unwrap();
        pool.broker
            .send_task_message(message("flaky_then_succeeds", "execute_task"))
            .await
            .unwrap();

        let queued = pool
            .broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);
        pool.process_one(queued).await;

        let stored = pool.persister.get_step("u1", "t1", 0).await.unwrap().unwrap();
        assert!(stored.completed);
    }

    #[tokio::test]
    async fn cancelled_task_short_circuits_dispatch() {
        let bus = Arc::new(ProgressBus::unbounded(
            Duration::from_secs(1),
            switchboard_shared::config::ConfirmationTimeoutPolicy::Proceed,
        ));
        bus.cancel_task("t1");
        let pool = Arc::new(
            WorkerPool::new(
                QueueName::FastTasks,
                Arc::new(BrokerClient::new(Arc::new(BrokerProviderKind::new_in_memory()))),
                Arc::new(Dispatcher::new(registry())),
                Arc::new(ResultPersister::in_memory()),
                &WorkerSettings::default(),
                RetrySettings::default(),
                DeadlineSettings::default(),
            )
            .with_bus(bus),
        );
        pool.broker.ensure_queues().await.unwrap();
        pool.broker
            .send_task_message(message("analyze_text", "execute_task"))
            .await
            .unwrap();
        let queued = pool
            .broker
            .receive_messages(QueueName::FastTasks, 1, Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);
        pool.process_one(queued).await;

        let stored = pool.persister.get_step("u1", "t1", 0).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_stops_worker_loop() {
        let pool = pool(QueueName::FastTasks);
        let handle = pool.spawn();
        handle.shutdown(Duration::from_millis(200)).await;
    }
}
