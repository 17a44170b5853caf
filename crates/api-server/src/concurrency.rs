use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use council_core::{CouncilError, CouncilResult};
use serde::Serialize;
use tokio::sync::Semaphore;

/// Pool statistics surfaced on the health endpoint.
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
pub struct PoolStats {
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub current_running: usize,
    pub current_queued: usize,
    pub peak_concurrent: usize,
    pub average_execution_secs: f64,
}

/// In-process analysis pool behind the direct-run API: a semaphore caps
/// concurrency, a bounded wait queue fails fast. Independent of the
/// workflow scheduler's own cap.
pub struct AnalysisPool {
    semaphore: Arc<Semaphore>,
    max_queue_size: usize,
    queued: AtomicUsize,
    running: AtomicUsize,
    stats: Mutex<PoolStats>,
}

impl AnalysisPool {
    pub fn new(max_concurrent: usize, max_queue_size: usize) -> Arc<Self> {
        tracing::info!(max_concurrent, max_queue_size, "analysis pool ready");
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_queue_size,
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            stats: Mutex::new(PoolStats::default()),
        })
    }

    /// Run a future under the pool cap. A full wait queue rejects
    /// immediately rather than building unbounded backlog.
    pub async fn run<T, F>(&self, fut: F) -> CouncilResult<T>
    where
        F: Future<Output = CouncilResult<T>>,
    {
        if self.queued.load(Ordering::SeqCst) >= self.max_queue_size {
            return Err(CouncilError::Unavailable(format!(
                "analysis queue full ({} waiting)",
                self.max_queue_size
            )));
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock().expect("pool stats poisoned");
            stats.total_submitted += 1;
            stats.current_queued = self.queued.load(Ordering::SeqCst);
        }

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CouncilError::Internal("analysis pool closed".to_string()))?;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut stats = self.stats.lock().expect("pool stats poisoned");
            stats.current_queued = self.queued.load(Ordering::SeqCst);
            stats.current_running = running;
            stats.peak_concurrent = stats.peak_concurrent.max(running);
        }

        let started = Instant::now();
        let result = fut.await;
        drop(permit);

        let elapsed = started.elapsed().as_secs_f64();
        self.running.fetch_sub(1, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock().expect("pool stats poisoned");
            stats.current_running = self.running.load(Ordering::SeqCst);
            match &result {
                Ok(_) => {
                    stats.total_completed += 1;
                    let done = stats.total_completed as f64;
                    stats.average_execution_secs =
                        (stats.average_execution_secs * (done - 1.0) + elapsed) / done;
                }
                Err(_) => stats.total_failed += 1,
            }
        }

        result
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.lock().expect("pool stats poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn pool_caps_concurrency_and_tracks_peak() {
        let pool = AnalysisPool::new(2, 50);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, council_core::CouncilError>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let stats = pool.stats();
        assert_eq!(stats.total_completed, 8);
        assert_eq!(stats.current_running, 0);
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let pool = AnalysisPool::new(1, 0);
        // Queue capacity zero turns every submission away.
        let err = pool
            .run(async { Ok::<_, council_core::CouncilError>(()) })
            .await;
        assert!(matches!(err, Err(CouncilError::Unavailable(_))));
    }
}
