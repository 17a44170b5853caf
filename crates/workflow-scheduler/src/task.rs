use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use council_core::{AnalysisRequest, TaskPriority, TaskStatus};
use serde::{Deserialize, Serialize};

/// A task as the scheduler owns it. Never leaves the scheduler; readers
/// get `TaskSnapshot` copies.
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub task_id: String,
    pub task_kind: String,
    pub request: AnalysisRequest,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub dependencies: Vec<String>,
    /// Submission order; the FIFO tie-break within a priority class.
    pub seq: u64,
}

impl WorkflowTask {
    /// Apply a lifecycle transition, refusing illegal edges. Terminal
    /// states are absorbing, which is what makes cancellation beat a
    /// late timeout or completion.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed
            | TaskStatus::Failed
            | TaskStatus::Cancelled
            | TaskStatus::Timeout => self.completed_at = Some(Utc::now()),
            TaskStatus::Pending => {}
        }
        true
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            task_kind: self.task_kind.clone(),
            symbol: self.request.symbol.clone(),
            request: self.request.clone(),
            priority: self.priority,
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time_secs: match (self.started_at, self.completed_at) {
                (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
                _ => None,
            },
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            result: self.result.clone(),
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Immutable deep copy handed to readers and lifecycle callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub task_kind: String,
    pub symbol: String,
    pub request: AnalysisRequest,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_secs: Option<f64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub dependencies: Vec<String>,
}

/// Counters surfaced by `Metrics()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub timeout_tasks: usize,
    pub average_execution_secs: f64,
    pub success_rate: f64,
    pub last_updated: Option<DateTime<Utc>>,
}
