mod scheduler;
mod task;

pub use scheduler::{
    EventCallback, SchedulerConfig, TaskEvent, TaskExecutor, WorkflowScheduler,
};
pub use task::{TaskSnapshot, WorkflowMetrics, WorkflowTask};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use council_core::{
        AnalysisKind, AnalysisParameters, AnalysisRequest, CouncilError, CouncilResult,
        MarketType, TaskPriority, TaskStatus,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn request(symbol: &str, priority: TaskPriority) -> AnalysisRequest {
        AnalysisRequest {
            symbol: symbol.to_string(),
            market: MarketType::Us,
            analysis_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            kind: AnalysisKind::Fundamentals,
            parameters: AnalysisParameters::default(),
            priority,
            timeout_seconds: None,
            dependencies: Vec::new(),
        }
    }

    /// Executor that sleeps then succeeds, tracking invocation and
    /// concurrency peaks.
    struct SleepExecutor {
        delay: Duration,
        invocations: AtomicU32,
        current: AtomicI64,
        peak: AtomicI64,
    }

    impl SleepExecutor {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                invocations: AtomicU32::new(0),
                current: AtomicI64::new(0),
                peak: AtomicI64::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskExecutor for SleepExecutor {
        async fn execute(&self, task: TaskSnapshot) -> CouncilResult<serde_json::Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "symbol": task.symbol }))
        }
    }

    /// Executor recording the order symbols run in.
    struct OrderExecutor {
        order: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl TaskExecutor for OrderExecutor {
        async fn execute(&self, task: TaskSnapshot) -> CouncilResult<serde_json::Value> {
            self.order.lock().unwrap().push(task.symbol.clone());
            tokio::time::sleep(self.delay).await;
            Ok(json!(null))
        }
    }

    /// Executor failing a configured number of times before succeeding.
    struct FlakyExecutor {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl TaskExecutor for FlakyExecutor {
        async fn execute(&self, _task: TaskSnapshot) -> CouncilResult<serde_json::Value> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(CouncilError::Unavailable("transient".to_string()))
            } else {
                Ok(json!("recovered"))
            }
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..600 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached in time");
    }

    fn config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            max_queue_size: 100,
            default_timeout: Duration::from_secs(300),
            default_max_retries: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_task_completes_with_single_lifecycle_events(
    ) {
        let scheduler = WorkflowScheduler::new(config(2));
        scheduler.register_executor("analysis", SleepExecutor::new(Duration::from_millis(100)));

        let started = Arc::new(AtomicU32::new(0));
        let completed = Arc::new(AtomicU32::new(0));
        {
            let started = Arc::clone(&started);
            scheduler.register_callback(
                TaskEvent::Started,
                Arc::new(move |_| {
                    started.fetch_add(1, Ordering::SeqCst);
                }),
            );
            let completed = Arc::clone(&completed);
            scheduler.register_callback(
                TaskEvent::Completed,
                Arc::new(move |snapshot| {
                    assert_eq!(snapshot.status, TaskStatus::Completed);
                    completed.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        scheduler.start();

        let task_id = scheduler
            .submit("analysis", request("000858", TaskPriority::Normal))
            .unwrap();

        {
            let scheduler = Arc::clone(&scheduler);
            let id = task_id.clone();
            wait_until(move || {
                scheduler
                    .get(&id)
                    .is_some_and(|t| t.status == TaskStatus::Completed)
            })
            .await;
        }

        let snapshot = scheduler.get(&task_id).unwrap();
        assert_eq!(snapshot.progress, 100.0);
        assert_eq!(snapshot.retry_count, 0);
        assert!(snapshot.result.is_some());
        assert!(snapshot.started_at.unwrap() <= snapshot.completed_at.unwrap());

        // Give the pump a beat to drain.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_terminal_and_fires_timeout_event() {
        let scheduler = WorkflowScheduler::new(config(2));
        scheduler.register_executor("analysis", SleepExecutor::new(Duration::from_secs(10)));
        let timeouts = Arc::new(AtomicU32::new(0));
        {
            let timeouts = Arc::clone(&timeouts);
            scheduler.register_callback(
                TaskEvent::Timeout,
                Arc::new(move |_| {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        scheduler.start();

        let mut req = request("AAPL", TaskPriority::Normal);
        req.timeout_seconds = Some(1);
        let task_id = scheduler.submit("analysis", req).unwrap();

        {
            let scheduler = Arc::clone(&scheduler);
            let id = task_id.clone();
            wait_until(move || {
                scheduler
                    .get(&id)
                    .is_some_and(|t| t.status == TaskStatus::Timeout)
            })
            .await;
        }

        let snapshot = scheduler.get(&task_id).unwrap();
        assert_eq!(snapshot.retry_count, 0, "timeouts are never retried");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_holds_under_load() {
        let scheduler = WorkflowScheduler::new(config(5));
        let executor = SleepExecutor::new(Duration::from_millis(500));
        scheduler.register_executor("analysis", Arc::clone(&executor) as Arc<dyn TaskExecutor>);
        scheduler.start();

        for i in 0..12 {
            scheduler
                .submit("analysis", request(&format!("SYM{i}"), TaskPriority::Normal))
                .unwrap();
        }

        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().completed_tasks == 12).await;
        }

        assert!(executor.peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(executor.current.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.metrics().running_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn priority_order_urgent_first_fifo_within_class() {
        let scheduler = WorkflowScheduler::new(config(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_executor(
            "analysis",
            Arc::new(OrderExecutor {
                order: Arc::clone(&order),
                delay: Duration::from_millis(50),
            }),
        );
        scheduler.start();

        // Occupy the single slot, then queue the contenders.
        scheduler
            .submit("analysis", request("BLOCKER", TaskPriority::Normal))
            .unwrap();
        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().running_tasks == 1).await;
        }

        scheduler
            .submit("analysis", request("LOW", TaskPriority::Low))
            .unwrap();
        scheduler
            .submit("analysis", request("HIGH", TaskPriority::High))
            .unwrap();
        scheduler
            .submit("analysis", request("URGENT", TaskPriority::Urgent))
            .unwrap();
        scheduler
            .submit("analysis", request("NORMAL-1", TaskPriority::Normal))
            .unwrap();
        scheduler
            .submit("analysis", request("NORMAL-2", TaskPriority::Normal))
            .unwrap();

        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().completed_tasks == 6).await;
        }

        let order = order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec!["BLOCKER", "URGENT", "HIGH", "NORMAL-1", "NORMAL-2", "LOW"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_wait_for_completion_and_stall_on_failure() {
        let scheduler = WorkflowScheduler::new(config(3));
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_executor(
            "analysis",
            Arc::new(OrderExecutor {
                order: Arc::clone(&order),
                delay: Duration::from_millis(200),
            }),
        );
        scheduler.register_executor(
            "flaky",
            Arc::new(FlakyExecutor {
                failures_left: AtomicU32::new(u32::MAX),
            }),
        );
        scheduler.start();

        let parent = scheduler
            .submit("analysis", request("PARENT", TaskPriority::Normal))
            .unwrap();
        let mut child_req = request("CHILD", TaskPriority::Urgent);
        child_req.dependencies = vec![parent.clone()];
        let child = scheduler.submit("analysis", child_req).unwrap();

        {
            let scheduler = Arc::clone(&scheduler);
            let id = child.clone();
            wait_until(move || {
                scheduler
                    .get(&id)
                    .is_some_and(|t| t.status == TaskStatus::Completed)
            })
            .await;
        }
        assert_eq!(order.lock().unwrap().clone(), vec!["PARENT", "CHILD"]);

        // A permanently failing dependency leaves the dependent PENDING.
        let doomed = scheduler
            .submit("flaky", request("DOOMED", TaskPriority::Normal))
            .unwrap();
        let mut orphan_req = request("ORPHAN", TaskPriority::Normal);
        orphan_req.dependencies = vec![doomed.clone()];
        let orphan = scheduler.submit("analysis", orphan_req).unwrap();

        {
            let scheduler = Arc::clone(&scheduler);
            let id = doomed.clone();
            wait_until(move || {
                scheduler
                    .get(&id)
                    .is_some_and(|t| t.status == TaskStatus::Failed)
            })
            .await;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(scheduler.get(&orphan).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_never_invokes_executor() {
        let scheduler = WorkflowScheduler::new(config(1));
        let executor = SleepExecutor::new(Duration::from_millis(500));
        scheduler.register_executor("analysis", Arc::clone(&executor) as Arc<dyn TaskExecutor>);
        scheduler.start();

        scheduler
            .submit("analysis", request("BLOCKER", TaskPriority::Normal))
            .unwrap();
        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().running_tasks == 1).await;
        }
        let queued = scheduler
            .submit("analysis", request("QUEUED", TaskPriority::Normal))
            .unwrap();

        assert!(scheduler.cancel(&queued));
        assert_eq!(scheduler.get(&queued).unwrap().status, TaskStatus::Cancelled);

        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().completed_tasks == 1).await;
        }
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);

        // Cancelling a terminal task returns false.
        assert!(!scheduler.cancel(&queued));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_running_beats_later_completion() {
        let scheduler = WorkflowScheduler::new(config(1));
        scheduler.register_executor("analysis", SleepExecutor::new(Duration::from_secs(60)));
        scheduler.start();

        let task_id = scheduler
            .submit("analysis", request("AAPL", TaskPriority::Normal))
            .unwrap();
        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().running_tasks == 1).await;
        }

        assert!(scheduler.cancel(&task_id));
        let snapshot = scheduler.get(&task_id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);

        // The aborted runner must not resurrect the task.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(scheduler.get(&task_id).unwrap().status, TaskStatus::Cancelled);
        assert!(scheduler.get(&task_id).unwrap().result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_reuse_the_same_task_id() {
        let scheduler = WorkflowScheduler::new(config(1));
        scheduler.register_executor(
            "flaky",
            Arc::new(FlakyExecutor {
                failures_left: AtomicU32::new(2),
            }),
        );
        scheduler.start();

        let task_id = scheduler
            .submit("flaky", request("FLKY", TaskPriority::Normal))
            .unwrap();
        {
            let scheduler = Arc::clone(&scheduler);
            let id = task_id.clone();
            wait_until(move || {
                scheduler
                    .get(&id)
                    .is_some_and(|t| t.status == TaskStatus::Completed)
            })
            .await;
        }

        let snapshot = scheduler.get(&task_id).unwrap();
        assert_eq!(snapshot.retry_count, 2);
        assert_eq!(snapshot.result, Some(json!("recovered")));
        assert_eq!(scheduler.metrics().total_tasks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_submissions() {
        let scheduler = WorkflowScheduler::new(SchedulerConfig {
            max_queue_size: 2,
            ..config(1)
        });
        scheduler.register_executor("analysis", SleepExecutor::new(Duration::from_secs(60)));
        // Not started: everything stays queued.
        scheduler
            .submit("analysis", request("A", TaskPriority::Normal))
            .unwrap();
        scheduler
            .submit("analysis", request("B", TaskPriority::Normal))
            .unwrap();
        let err = scheduler
            .submit("analysis", request("C", TaskPriority::Normal))
            .unwrap_err();
        assert!(matches!(err, CouncilError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_executor_fails_immediately_without_retry() {
        let scheduler = WorkflowScheduler::new(config(2));
        let failed = Arc::new(AtomicU32::new(0));
        {
            let failed = Arc::clone(&failed);
            scheduler.register_callback(
                TaskEvent::Failed,
                Arc::new(move |snapshot| {
                    assert!(snapshot.error.unwrap_or_default().contains("no executor"));
                    failed.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        scheduler.start();

        let task_id = scheduler
            .submit("unregistered", request("AAPL", TaskPriority::Normal))
            .unwrap();
        {
            let scheduler = Arc::clone(&scheduler);
            let id = task_id.clone();
            wait_until(move || {
                scheduler
                    .get(&id)
                    .is_some_and(|t| t.status == TaskStatus::Failed)
            })
            .await;
        }
        assert_eq!(scheduler.get(&task_id).unwrap().retry_count, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_request_is_rejected_at_submit() {
        let scheduler = WorkflowScheduler::new(config(1));
        let err = scheduler
            .submit("analysis", request("", TaskPriority::Normal))
            .unwrap_err();
        assert!(matches!(err, CouncilError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_running_tasks() {
        let scheduler = WorkflowScheduler::new(config(2));
        scheduler.register_executor("analysis", SleepExecutor::new(Duration::from_secs(600)));
        scheduler.start();

        let task_id = scheduler
            .submit("analysis", request("AAPL", TaskPriority::Normal))
            .unwrap();
        {
            let scheduler = Arc::clone(&scheduler);
            wait_until(move || scheduler.metrics().running_tasks == 1).await;
        }

        scheduler.stop(Duration::from_secs(5)).await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.get(&task_id).unwrap().status, TaskStatus::Cancelled);
    }
}
