use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use council_core::SourceTag;

/// Consecutive failures before a source is flagged ERROR and skipped.
const ERROR_BUDGET: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Available,
    Unavailable,
    RateLimited,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: SourceTag,
    pub status: SourceStatus,
    pub request_count: u64,
    pub error_count: u32,
    pub last_request: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct StateInner {
    status: SourceStatus,
    request_count: u64,
    error_count: u32,
    last_request: Option<DateTime<Utc>>,
}

/// Mutable per-source bookkeeping. Only the federation writes here;
/// everyone else reads snapshots.
#[derive(Debug)]
pub struct SourceState {
    tag: SourceTag,
    inner: Mutex<StateInner>,
}

impl SourceState {
    pub fn new(tag: SourceTag) -> Self {
        Self {
            tag,
            inner: Mutex::new(StateInner {
                status: SourceStatus::Available,
                request_count: 0,
                error_count: 0,
                last_request: None,
            }),
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.inner.lock().expect("source state poisoned").status
    }

    pub fn set_status(&self, status: SourceStatus) {
        let mut inner = self.inner.lock().expect("source state poisoned");
        if inner.status != status {
            tracing::info!(source = %self.tag, from = ?inner.status, to = ?status, "data source status changed");
            inner.status = status;
        }
    }

    pub fn record_request(&self) {
        let mut inner = self.inner.lock().expect("source state poisoned");
        inner.request_count += 1;
        inner.last_request = Some(Utc::now());
    }

    /// Bump the rolling error count; past the budget the source is ERROR
    /// until a successful request heals it.
    pub fn record_error(&self) {
        let mut inner = self.inner.lock().expect("source state poisoned");
        inner.error_count += 1;
        if inner.error_count > ERROR_BUDGET {
            if inner.status != SourceStatus::Error {
                tracing::warn!(
                    source = %self.tag,
                    errors = inner.error_count,
                    "error budget exceeded, marking source ERROR"
                );
            }
            inner.status = SourceStatus::Error;
        }
    }

    /// Any success resets the rolling count and self-heals a transient
    /// ERROR or RATE_LIMITED flag.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("source state poisoned");
        inner.error_count = 0;
        if matches!(inner.status, SourceStatus::Error | SourceStatus::RateLimited) {
            inner.status = SourceStatus::Available;
        }
    }

    pub fn error_count(&self) -> u32 {
        self.inner.lock().expect("source state poisoned").error_count
    }

    pub fn snapshot(&self) -> SourceStats {
        let inner = self.inner.lock().expect("source state poisoned");
        SourceStats {
            source: self.tag,
            status: inner.status,
            request_count: inner.request_count,
            error_count: inner.error_count,
            last_request: inner.last_request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_budget_flags_source_after_five_failures() {
        let state = SourceState::new(SourceTag::Tushare);
        for _ in 0..5 {
            state.record_error();
            assert_ne!(state.status(), SourceStatus::Error);
        }
        state.record_error();
        assert_eq!(state.status(), SourceStatus::Error);
    }

    #[test]
    fn success_resets_count_and_heals_error() {
        let state = SourceState::new(SourceTag::Finnhub);
        for _ in 0..6 {
            state.record_error();
        }
        assert_eq!(state.status(), SourceStatus::Error);
        state.record_success();
        assert_eq!(state.status(), SourceStatus::Available);
        assert_eq!(state.error_count(), 0);
    }
}
