//! Worker Pool (C6): consumes the `fast_tasks`/`heavy_tasks` queues,
//! invokes the [`switchboard_registry::Dispatcher`], persists via
//! [`switchboard_executor::ResultPersister`], and publishes lifecycle
//! events through the [`switchboard_bus::ProgressBus`]. Retries retryable
//! failures with exponential backoff and bounds runtime with soft/hard
//! deadlines (spec §4.6/§4.10/§5).

mod metrics;
mod pool;

pub use metrics::{MemorySampler, MetricsSink, TaskMetric, TracingMetricsSink};
pub use pool::{WorkerPool, WorkerPoolHandle};
