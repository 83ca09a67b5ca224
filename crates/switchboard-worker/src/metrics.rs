//! Per-task metrics (spec §4.6): a `(queue, success, duration, memory_peak?)`
//! tuple recorded after every unit of work, successful or not.

use std::sync::Mutex;
use std::time::Duration;
use switchboard_shared::messaging::QueueName;
use sysinfo::System;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskMetric {
    pub queue: QueueName,
    pub success: bool,
    pub duration: Duration,
    pub memory_peak_bytes: Option<u64>,
}

/// Where recorded metrics go. `record` must not block the worker loop on
/// anything fallible — a metrics sink that can fail belongs behind its own
/// retry/buffering, not inline here.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn record(&self, metric: TaskMetric);
}

/// Default sink: one structured `tracing` event per task. Sufficient for
/// local development and any log-based aggregation; a production deployment
/// wires a different `MetricsSink` (StatsD, Prometheus push, etc.) without
/// touching the pool.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, metric: TaskMetric) {
        tracing::info!(
            queue = metric.queue.as_str(),
            success = metric.success,
            duration_ms = metric.duration.as_millis() as u64,
            memory_peak_bytes = metric.memory_peak_bytes,
            "task_metric"
        );
    }
}

/// Samples the current process's resident memory. Sampling costs a syscall
/// per task, so it's only invoked when `WorkerSettings::sample_memory` is
/// set — the `memory_peak?` field of the metric tuple is explicitly
/// optional in spec §4.6.
#[derive(Debug)]
pub struct MemorySampler {
    system: Mutex<System>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }

    /// Current resident memory of this process, in bytes, or `None` if the
    /// current process can't be resolved (sysinfo returns `None` in some
    /// sandboxed environments).
    pub fn sample(&self) -> Option<u64> {
        let mut system = self.system.lock().expect("memory sampler mutex poisoned");
        system.refresh_all();
        let pid = sysinfo::get_current_pid().ok()?;
        system.process(pid).map(|process| process.memory())
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
