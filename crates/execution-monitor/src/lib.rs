use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workflow_scheduler::{TaskEvent, WorkflowScheduler};

mod alerts;
mod metrics;

pub use alerts::{Alert, AlertBook, AlertLevel};
pub use metrics::{HostSampler, PerformanceMetrics, SystemMetrics};

const COLLECTION_INTERVAL: Duration = Duration::from_secs(30);
const HISTORY_RETENTION: chrono::Duration = chrono::Duration::hours(24);

/// Breach thresholds, configurable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub error_rate: f64,
    pub avg_response_time_secs: f64,
    pub queue_length: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_usage: 80.0,
            memory_usage: 85.0,
            disk_usage: 90.0,
            error_rate: 10.0,
            avg_response_time_secs: 300.0,
            queue_length: 50.0,
        }
    }
}

struct MonitorState {
    system_history: Vec<SystemMetrics>,
    performance_history: Vec<PerformanceMetrics>,
    alerts: AlertBook,
    last_completed_count: usize,
    last_sample_at: DateTime<Utc>,
}

/// Samples host and scheduler metrics on a fixed cadence, retains 24 h
/// of history, and drives threshold alerting.
pub struct ExecutionMonitor {
    scheduler: Arc<WorkflowScheduler>,
    thresholds: Thresholds,
    sampler: Mutex<HostSampler>,
    state: Mutex<MonitorState>,
}

impl ExecutionMonitor {
    pub fn new(scheduler: Arc<WorkflowScheduler>, thresholds: Thresholds) -> Arc<Self> {
        let monitor = Arc::new(Self {
            scheduler,
            thresholds,
            sampler: Mutex::new(HostSampler::new()),
            state: Mutex::new(MonitorState {
                system_history: Vec::new(),
                performance_history: Vec::new(),
                alerts: AlertBook::new(),
                last_completed_count: 0,
                last_sample_at: Utc::now(),
            }),
        });
        Self::register_scheduler_callbacks(&monitor);
        monitor
    }

    /// Task failures and timeouts become one-shot alerts; callbacks are
    /// cheap and non-blocking as the scheduler pipeline requires.
    fn register_scheduler_callbacks(this: &Arc<Self>) {
        let monitor = Arc::clone(this);
        this.scheduler.register_callback(
            TaskEvent::Failed,
            Arc::new(move |snapshot| {
                let mut metadata = HashMap::new();
                metadata.insert(
                    "task_id".to_string(),
                    serde_json::Value::String(snapshot.task_id.clone()),
                );
                monitor.state.lock().expect("monitor lock poisoned").alerts.one_shot(
                    AlertLevel::Error,
                    "task failed",
                    &format!(
                        "task {} ({}) failed: {}",
                        snapshot.task_id,
                        snapshot.symbol,
                        snapshot.error.as_deref().unwrap_or("unknown")
                    ),
                    "scheduler",
                    metadata,
                );
            }),
        );

        let monitor = Arc::clone(this);
        this.scheduler.register_callback(
            TaskEvent::Timeout,
            Arc::new(move |snapshot| {
                let mut metadata = HashMap::new();
                metadata.insert(
                    "task_id".to_string(),
                    serde_json::Value::String(snapshot.task_id.clone()),
                );
                monitor.state.lock().expect("monitor lock poisoned").alerts.one_shot(
                    AlertLevel::Error,
                    "task timed out",
                    &format!("task {} ({}) timed out", snapshot.task_id, snapshot.symbol),
                    "scheduler",
                    metadata,
                );
            }),
        );
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(COLLECTION_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                monitor.collect();
            }
        })
    }

    /// One collection pass: sample, derive, alert, trim.
    pub fn collect(&self) {
        let system = self.sampler.lock().expect("sampler lock poisoned").sample();

        let scheduler_metrics = self.scheduler.metrics();
        let now = Utc::now();

        let mut state = self.state.lock().expect("monitor lock poisoned");

        let elapsed = (now - state.last_sample_at).num_milliseconds() as f64 / 1000.0;
        let completed_delta = scheduler_metrics
            .completed_tasks
            .saturating_sub(state.last_completed_count);
        let throughput = if elapsed > 0.0 {
            completed_delta as f64 / elapsed
        } else {
            0.0
        };
        state.last_completed_count = scheduler_metrics.completed_tasks;
        state.last_sample_at = now;

        let finished = scheduler_metrics.completed_tasks + scheduler_metrics.failed_tasks;
        let error_rate = if finished > 0 {
            scheduler_metrics.failed_tasks as f64 / finished as f64 * 100.0
        } else {
            0.0
        };

        let performance = PerformanceMetrics {
            avg_response_time_secs: scheduler_metrics.average_execution_secs,
            throughput,
            error_rate,
            queue_length: scheduler_metrics.pending_tasks,
            concurrent_tasks: scheduler_metrics.running_tasks,
            timestamp: now,
        };

        Self::evaluate_thresholds(&mut state.alerts, &self.thresholds, &system, &performance);

        state.system_history.push(system);
        state.performance_history.push(performance);

        let cutoff = now - HISTORY_RETENTION;
        state.system_history.retain(|m| m.timestamp >= cutoff);
        state.performance_history.retain(|m| m.timestamp >= cutoff);
        state.alerts.prune(cutoff);
    }

    fn evaluate_thresholds(
        alerts: &mut AlertBook,
        thresholds: &Thresholds,
        system: &SystemMetrics,
        performance: &PerformanceMetrics,
    ) {
        let checks: [(&str, f64, f64); 6] = [
            ("cpu_usage", system.cpu_usage, thresholds.cpu_usage),
            ("memory_usage", system.memory_usage, thresholds.memory_usage),
            ("disk_usage", system.disk_usage, thresholds.disk_usage),
            ("error_rate", performance.error_rate, thresholds.error_rate),
            (
                "avg_response_time",
                performance.avg_response_time_secs,
                thresholds.avg_response_time_secs,
            ),
            (
                "queue_length",
                performance.queue_length as f64,
                thresholds.queue_length,
            ),
        ];

        for (metric, value, threshold) in checks {
            if value > threshold {
                alerts.raise_threshold(metric, value, threshold, "execution_monitor");
            } else {
                alerts.resolve_threshold(metric);
            }
        }
    }

    pub fn latest_system_metrics(&self) -> Option<SystemMetrics> {
        self.state
            .lock()
            .expect("monitor lock poisoned")
            .system_history
            .last()
            .cloned()
    }

    pub fn latest_performance_metrics(&self) -> Option<PerformanceMetrics> {
        self.state
            .lock()
            .expect("monitor lock poisoned")
            .performance_history
            .last()
            .cloned()
    }

    pub fn alerts(&self, active_only: bool) -> Vec<Alert> {
        self.state
            .lock()
            .expect("monitor lock poisoned")
            .alerts
            .list(active_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(cpu: f64) -> SystemMetrics {
        SystemMetrics {
            cpu_usage: cpu,
            memory_usage: 40.0,
            disk_usage: 50.0,
            net_bytes_sent: 0,
            net_bytes_received: 0,
            active_connections: 4,
            timestamp: Utc::now(),
        }
    }

    fn performance(queue: usize) -> PerformanceMetrics {
        PerformanceMetrics {
            avg_response_time_secs: 10.0,
            throughput: 1.0,
            error_rate: 0.0,
            queue_length: queue,
            concurrent_tasks: 2,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn breach_activates_then_resolves_on_recovery() {
        let thresholds = Thresholds::default();
        let mut alerts = AlertBook::new();

        ExecutionMonitor::evaluate_thresholds(
            &mut alerts,
            &thresholds,
            &system(92.0),
            &performance(0),
        );
        let active = alerts.list(true);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "threshold_cpu_usage");

        // Still breaching: same alert, no duplicate.
        ExecutionMonitor::evaluate_thresholds(
            &mut alerts,
            &thresholds,
            &system(95.0),
            &performance(0),
        );
        assert_eq!(alerts.list(true).len(), 1);

        // Recovered: resolved, nothing active.
        ExecutionMonitor::evaluate_thresholds(
            &mut alerts,
            &thresholds,
            &system(20.0),
            &performance(0),
        );
        assert!(alerts.list(true).is_empty());
        assert_eq!(alerts.list(false).len(), 1);
    }

    #[test]
    fn queue_breach_uses_its_own_metric_id() {
        let thresholds = Thresholds::default();
        let mut alerts = AlertBook::new();
        ExecutionMonitor::evaluate_thresholds(
            &mut alerts,
            &thresholds,
            &system(10.0),
            &performance(70),
        );
        let active = alerts.list(true);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "threshold_queue_length");
    }
}
