use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use council_core::{AnalysisRequest, CouncilError, CouncilResult, TaskStatus};
use tokio::sync::mpsc;

use crate::task::{TaskSnapshot, WorkflowMetrics, WorkflowTask};

/// How long terminal tasks stay queryable before the retention sweep.
const TERMINAL_RETENTION: chrono::Duration = chrono::Duration::hours(24);

/// Scheduler loop cadence.
const TICK: Duration = Duration::from_secs(1);

/// Turns a dispatched task into a result. One registered per task kind.
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: TaskSnapshot) -> CouncilResult<serde_json::Value>;
}

/// Lifecycle events delivered through the ordered callback pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    Started,
    Completed,
    Failed,
    Timeout,
}

impl TaskEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEvent::Started => "task_started",
            TaskEvent::Completed => "task_completed",
            TaskEvent::Failed => "task_failed",
            TaskEvent::Timeout => "task_timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task_started" => Some(TaskEvent::Started),
            "task_completed" => Some(TaskEvent::Completed),
            "task_failed" => Some(TaskEvent::Failed),
            "task_timeout" => Some(TaskEvent::Timeout),
            _ => None,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(TaskSnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub default_timeout: Duration,
    pub default_max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 100,
            default_timeout: Duration::from_secs(300),
            default_max_retries: 3,
        }
    }
}

/// Everything mutated together lives behind one mutex, held only for
/// short, non-awaiting sections.
struct Inner {
    tasks: HashMap<String, WorkflowTask>,
    /// Pending task ids, kept sorted: priority desc, submission order asc.
    queue: Vec<String>,
    running: HashMap<String, tokio::task::JoinHandle<()>>,
    next_seq: u64,
}

impl Inner {
    fn sort_queue(&mut self) {
        let tasks = &self.tasks;
        self.queue.sort_by(|a, b| {
            let ta = &tasks[a];
            let tb = &tasks[b];
            tb.priority.cmp(&ta.priority).then(ta.seq.cmp(&tb.seq))
        });
    }
}

/// Priority-ordered, concurrency-limited task queue with retries,
/// timeouts, dependencies, cancellation, and lifecycle callbacks.
pub struct WorkflowScheduler {
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
    callbacks: RwLock<HashMap<TaskEvent, Vec<EventCallback>>>,
    events_tx: mpsc::UnboundedSender<(TaskEvent, TaskSnapshot)>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<(TaskEvent, TaskSnapshot)>>>,
    is_running: AtomicBool,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pump_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    self_ref: Weak<Self>,
}

impl WorkflowScheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|self_ref| Self {
            config,
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                queue: Vec::new(),
                running: HashMap::new(),
                next_seq: 0,
            }),
            executors: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            is_running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            pump_handle: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("scheduler dropped while in use")
    }

    pub fn register_executor(&self, task_kind: &str, executor: Arc<dyn TaskExecutor>) {
        self.executors
            .write()
            .expect("executor lock poisoned")
            .insert(task_kind.to_string(), executor);
        tracing::info!(task_kind, "registered task executor");
    }

    /// Callbacks run on the single event pump so delivery order matches
    /// transition order; they receive immutable snapshots and must not
    /// block (offload slow work).
    pub fn register_callback(&self, event: TaskEvent, callback: EventCallback) {
        self.callbacks
            .write()
            .expect("callback lock poisoned")
            .entry(event)
            .or_default()
            .push(callback);
    }

    /// Accept a task. Fails fast on a malformed request or a full queue.
    pub fn submit(&self, task_kind: &str, request: AnalysisRequest) -> CouncilResult<String> {
        request.validate()?;

        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        if inner.queue.len() >= self.config.max_queue_size {
            return Err(CouncilError::Unavailable(format!(
                "task queue full ({} pending)",
                inner.queue.len()
            )));
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let task = WorkflowTask {
            task_id: task_id.clone(),
            task_kind: task_kind.to_string(),
            priority: request.priority,
            timeout: request
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.config.default_timeout),
            dependencies: request.dependencies.clone(),
            request,
            status: TaskStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: self.config.default_max_retries,
            result: None,
            error: None,
            metadata: HashMap::new(),
            seq,
        };

        tracing::info!(task_id = %task.task_id, task_kind, symbol = %task.request.symbol, "task submitted");
        inner.queue.push(task_id.clone());
        inner.tasks.insert(task_id.clone(), task);
        inner.sort_queue();
        Ok(task_id)
    }

    /// O(1) immutable copy.
    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .lock()
            .expect("scheduler lock poisoned")
            .tasks
            .get(task_id)
            .map(WorkflowTask::snapshot)
    }

    /// Newest-first listing with optional symbol/status filters.
    pub fn list(
        &self,
        symbol: Option<&str>,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Vec<TaskSnapshot> {
        let inner = self.inner.lock().expect("scheduler lock poisoned");
        let mut tasks: Vec<&WorkflowTask> = inner
            .tasks
            .values()
            .filter(|t| symbol.is_none_or(|s| t.request.symbol == s))
            .filter(|t| status.is_none_or(|s| t.status == s))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
            .into_iter()
            .take(limit.min(200))
            .map(|t| t.snapshot())
            .collect()
    }

    /// Cancel a pending or running task. Terminal tasks return false.
    pub fn cancel(&self, task_id: &str) -> bool {
        let handle = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return false;
            };
            if !task.transition(TaskStatus::Cancelled) {
                return false;
            }
            task.error = Some("cancelled by caller".to_string());
            inner.queue.retain(|id| id != task_id);
            inner.running.remove(task_id)
        };

        // The abort is the cancellation signal; every suspension point in
        // the runner observes it.
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::info!(task_id, "task cancelled");
        true
    }

    pub fn metrics(&self) -> WorkflowMetrics {
        let inner = self.inner.lock().expect("scheduler lock poisoned");
        let mut metrics = WorkflowMetrics {
            total_tasks: inner.tasks.len(),
            last_updated: Some(Utc::now()),
            ..Default::default()
        };

        let mut total_exec = 0.0;
        let mut exec_count = 0usize;
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => metrics.pending_tasks += 1,
                TaskStatus::Running => metrics.running_tasks += 1,
                TaskStatus::Completed => metrics.completed_tasks += 1,
                TaskStatus::Failed => metrics.failed_tasks += 1,
                TaskStatus::Cancelled => metrics.cancelled_tasks += 1,
                TaskStatus::Timeout => metrics.timeout_tasks += 1,
            }
            if task.status == TaskStatus::Completed {
                if let (Some(start), Some(end)) = (task.started_at, task.completed_at) {
                    total_exec += (end - start).num_milliseconds() as f64 / 1000.0;
                    exec_count += 1;
                }
            }
        }
        if exec_count > 0 {
            metrics.average_execution_secs = total_exec / exec_count as f64;
        }
        let finished = metrics.completed_tasks + metrics.failed_tasks;
        if finished > 0 {
            metrics.success_rate = metrics.completed_tasks as f64 / finished as f64 * 100.0;
        }
        metrics
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler already running");
            return;
        }

        // Event pump: single consumer so callback order matches
        // transition order.
        if let Some(mut rx) = self.events_rx.lock().expect("event lock poisoned").take() {
            let scheduler = self.arc();
            let pump = tokio::spawn(async move {
                while let Some((event, snapshot)) = rx.recv().await {
                    let callbacks = {
                        let map = scheduler.callbacks.read().expect("callback lock poisoned");
                        map.get(&event).cloned().unwrap_or_default()
                    };
                    for callback in callbacks {
                        callback(snapshot.clone());
                    }
                }
            });
            *self.pump_handle.lock().expect("pump lock poisoned") = Some(pump);
        }

        let scheduler = self.arc();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while scheduler.is_running.load(Ordering::SeqCst) {
                tick.tick().await;
                scheduler.process_queue();
                scheduler.sweep_timeouts();
                scheduler.sweep_terminal();
            }
        });
        *self.loop_handle.lock().expect("loop lock poisoned") = Some(handle);
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            "workflow scheduler started"
        );
    }

    /// Graceful stop: no new dispatches, running tasks get cancellation
    /// signals, then wait out the deadline before declaring them dead.
    pub async fn stop(&self, deadline: Duration) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<(String, tokio::task::JoinHandle<()>)> = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            let ids: Vec<String> = inner.running.keys().cloned().collect();
            for id in &ids {
                if let Some(task) = inner.tasks.get_mut(id) {
                    if task.transition(TaskStatus::Cancelled) {
                        task.error = Some("scheduler stopped".to_string());
                    }
                }
            }
            ids.into_iter()
                .filter_map(|id| inner.running.remove(&id).map(|h| (id, h)))
                .collect()
        };

        for (_, handle) in &handles {
            handle.abort();
        }
        let wait_all = async {
            for (_, handle) in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, wait_all).await.is_err() {
            tracing::warn!("some runners did not stop within the deadline");
        }

        if let Some(handle) = self.loop_handle.lock().expect("loop lock poisoned").take() {
            handle.abort();
        }
        tracing::info!("workflow scheduler stopped");
    }

    /// One pass over the ready subset of the queue: dependency-complete,
    /// due, dispatched in priority-then-FIFO order up to the cap.
    fn process_queue(&self) {
        let now = Utc::now();
        loop {
            let dispatch = {
                let mut inner = self.inner.lock().expect("scheduler lock poisoned");
                if inner.running.len() >= self.config.max_concurrent {
                    break;
                }

                // The queue is kept sorted; the first ready entry wins.
                let ready_id = inner.queue.iter().cloned().find(|id| {
                    let Some(task) = inner.tasks.get(id) else {
                        return false;
                    };
                    if task.status != TaskStatus::Pending {
                        return false;
                    }
                    if task.scheduled_at.is_some_and(|at| at > now) {
                        return false;
                    }
                    task.dependencies.iter().all(|dep| {
                        inner
                            .tasks
                            .get(dep)
                            .is_some_and(|d| d.status == TaskStatus::Completed)
                    })
                });
                let Some(task_id) = ready_id else {
                    break;
                };

                inner.queue.retain(|id| id != &task_id);

                let executor = self
                    .executors
                    .read()
                    .expect("executor lock poisoned")
                    .get(&inner.tasks[&task_id].task_kind)
                    .cloned();

                let task = inner.tasks.get_mut(&task_id).expect("task exists");
                match executor {
                    Some(executor) => {
                        task.transition(TaskStatus::Running);
                        Some((task_id, task.snapshot(), executor, task.timeout))
                    }
                    None => {
                        // No retry: the registry will not change mid-task.
                        task.error =
                            Some(format!("no executor registered for kind {}", task.task_kind));
                        task.transition(TaskStatus::Running);
                        task.transition(TaskStatus::Failed);
                        let snapshot = task.snapshot();
                        drop(inner);
                        tracing::error!(task_id = %task_id, "dispatch failed: executor missing");
                        self.emit(TaskEvent::Failed, snapshot);
                        continue;
                    }
                }
            };

            let Some((task_id, snapshot, executor, timeout)) = dispatch else {
                continue;
            };

            self.emit(TaskEvent::Started, snapshot.clone());
            tracing::info!(task_id = %task_id, kind = %snapshot.task_kind, "task started");

            let scheduler = self.arc();
            let id_for_runner = task_id.clone();
            let handle = tokio::spawn(async move {
                let outcome = tokio::time::timeout(timeout, executor.execute(snapshot)).await;
                match outcome {
                    Ok(Ok(value)) => scheduler.finish_success(&id_for_runner, value),
                    Ok(Err(err)) => scheduler.finish_failure(&id_for_runner, err),
                    Err(_) => scheduler.finish_timeout(&id_for_runner),
                }
            });

            // The runner may already have finished; only track it while
            // the task is still RUNNING, else the map would leak a handle.
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            if inner
                .tasks
                .get(&task_id)
                .is_some_and(|t| t.status == TaskStatus::Running)
            {
                inner.running.insert(task_id, handle);
            }
        }
    }

    fn finish_success(&self, task_id: &str, value: serde_json::Value) {
        let snapshot = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            inner.running.remove(task_id);
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return;
            };
            if !task.transition(TaskStatus::Completed) {
                return;
            }
            task.result = Some(value);
            task.progress = 100.0;
            task.snapshot()
        };
        tracing::info!(task_id, "task completed");
        self.emit(TaskEvent::Completed, snapshot);
    }

    fn finish_failure(&self, task_id: &str, err: CouncilError) {
        let (snapshot, retried) = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            inner.running.remove(task_id);
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return;
            };
            if task.status != TaskStatus::Running {
                return;
            }
            task.error = Some(err.to_string());
            if task.retry_count < task.max_retries {
                task.retry_count += 1;
                task.transition(TaskStatus::Pending);
                task.started_at = None;
                let retry = task.retry_count;
                let id = task.task_id.clone();
                inner.queue.push(id);
                inner.sort_queue();
                tracing::warn!(task_id, retry, error = %err, "task failed, re-queued");
                (None, true)
            } else {
                task.transition(TaskStatus::Failed);
                (Some(task.snapshot()), false)
            }
        };
        if !retried {
            tracing::error!(task_id, error = %err, "task failed permanently");
        }
        if let Some(snapshot) = snapshot {
            self.emit(TaskEvent::Failed, snapshot);
        }
    }

    /// Deadline expiry is terminal; timeouts are never retried.
    fn finish_timeout(&self, task_id: &str) {
        let snapshot = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            inner.running.remove(task_id);
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return;
            };
            if !task.transition(TaskStatus::Timeout) {
                return;
            }
            task.error = Some(format!("execution exceeded {:?}", task.timeout));
            task.snapshot()
        };
        tracing::error!(task_id, "task timed out");
        self.emit(TaskEvent::Timeout, snapshot);
    }

    /// Belt-and-braces sweep for wedged runners whose own deadline did
    /// not fire (e.g. an executor blocking the timer).
    fn sweep_timeouts(&self) {
        let now = Utc::now();
        let expired: Vec<(String, tokio::task::JoinHandle<()>, TaskSnapshot)> = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            let overdue: Vec<String> = inner
                .running
                .keys()
                .filter(|id| {
                    inner.tasks.get(*id).is_some_and(|task| {
                        task.started_at.is_some_and(|started| {
                            let limit =
                                chrono::Duration::from_std(task.timeout + Duration::from_secs(5))
                                    .unwrap_or(chrono::Duration::seconds(305));
                            now - started > limit
                        })
                    })
                })
                .cloned()
                .collect();

            overdue
                .into_iter()
                .filter_map(|id| {
                    let handle = inner.running.remove(&id)?;
                    let task = inner.tasks.get_mut(&id)?;
                    if !task.transition(TaskStatus::Timeout) {
                        return None;
                    }
                    task.error = Some(format!("execution exceeded {:?}", task.timeout));
                    Some((id, handle, task.snapshot()))
                })
                .collect()
        };

        for (task_id, handle, snapshot) in expired {
            handle.abort();
            tracing::error!(task_id = %task_id, "runner swept after missing its deadline");
            self.emit(TaskEvent::Timeout, snapshot);
        }
    }

    /// Drop terminal tasks older than the retention window.
    fn sweep_terminal(&self) {
        let cutoff = Utc::now() - TERMINAL_RETENTION;
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        inner.tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
    }

    fn emit(&self, event: TaskEvent, snapshot: TaskSnapshot) {
        if self.events_tx.send((event, snapshot)).is_err() {
            tracing::warn!(event = event.as_str(), "event pipeline closed");
        }
    }
}
