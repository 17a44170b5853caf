use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Alert registry with monotonic threshold lifecycles: within one
/// breach an id goes INACTIVE -> ACTIVE -> RESOLVED, never a second
/// ACTIVE under a fresh id for the same metric.
#[derive(Default)]
pub struct AlertBook {
    alerts: HashMap<String, Alert>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise or refresh the threshold alert for `metric`. Severity is
    /// WARN below 1.2x the threshold and ERROR at or beyond. An already
    /// active alert keeps its identity; only the level may escalate.
    pub fn raise_threshold(&mut self, metric: &str, value: f64, threshold: f64, source: &str) {
        let id = format!("threshold_{metric}");
        let level = if value >= threshold * 1.2 {
            AlertLevel::Error
        } else {
            AlertLevel::Warn
        };
        let message = format!("{metric} at {value:.1} exceeds threshold {threshold:.1}");

        match self.alerts.get_mut(&id) {
            Some(alert) if !alert.resolved => {
                if alert.level == AlertLevel::Warn && level == AlertLevel::Error {
                    alert.level = AlertLevel::Error;
                    alert.message = message;
                    tracing::warn!(alert_id = %id, "threshold alert escalated");
                }
            }
            _ => {
                tracing::warn!(alert_id = %id, value, threshold, "threshold alert raised");
                self.alerts.insert(
                    id.clone(),
                    Alert {
                        id,
                        level,
                        title: format!("{metric} above threshold"),
                        message,
                        source: source.to_string(),
                        timestamp: Utc::now(),
                        resolved: false,
                        resolved_at: None,
                        metadata: HashMap::new(),
                    },
                );
            }
        }
    }

    /// Resolve the metric's alert when the value drops back under.
    pub fn resolve_threshold(&mut self, metric: &str) {
        let id = format!("threshold_{metric}");
        if let Some(alert) = self.alerts.get_mut(&id) {
            if !alert.resolved {
                alert.resolved = true;
                alert.resolved_at = Some(Utc::now());
                tracing::info!(alert_id = %id, "threshold alert resolved");
            }
        }
    }

    /// One-shot alert with a unique id (task failures, timeouts).
    pub fn one_shot(
        &mut self,
        level: AlertLevel,
        title: &str,
        message: &str,
        source: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> String {
        let id = format!("alert_{}", uuid::Uuid::new_v4());
        self.alerts.insert(
            id.clone(),
            Alert {
                id: id.clone(),
                level,
                title: title.to_string(),
                message: message.to_string(),
                source: source.to_string(),
                timestamp: Utc::now(),
                resolved: false,
                resolved_at: None,
                metadata,
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.get(id)
    }

    pub fn list(&self, active_only: bool) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .values()
            .filter(|a| !active_only || !a.resolved)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    /// Drop resolved alerts older than the cutoff.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.alerts
            .retain(|_, alert| !alert.resolved || alert.resolved_at.is_none_or(|at| at >= cutoff));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_is_monotonic_one_active_alert_per_metric() {
        let mut book = AlertBook::new();
        book.raise_threshold("cpu_usage", 85.0, 80.0, "monitor");
        book.raise_threshold("cpu_usage", 88.0, 80.0, "monitor");
        book.raise_threshold("cpu_usage", 89.0, 80.0, "monitor");

        let active = book.list(true);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "threshold_cpu_usage");
        assert_eq!(active[0].level, AlertLevel::Warn);
    }

    #[test]
    fn severity_escalates_at_one_point_two_times() {
        let mut book = AlertBook::new();
        book.raise_threshold("memory_usage", 90.0, 85.0, "monitor");
        assert_eq!(
            book.get("threshold_memory_usage").unwrap().level,
            AlertLevel::Warn
        );
        book.raise_threshold("memory_usage", 85.0 * 1.25, 85.0, "monitor");
        assert_eq!(
            book.get("threshold_memory_usage").unwrap().level,
            AlertLevel::Error
        );
    }

    #[test]
    fn resolve_then_new_breach_creates_fresh_cycle() {
        let mut book = AlertBook::new();
        book.raise_threshold("queue_length", 60.0, 50.0, "monitor");
        book.resolve_threshold("queue_length");
        let resolved = book.get("threshold_queue_length").unwrap();
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());

        // A later breach re-activates under the same id, a new cycle.
        book.raise_threshold("queue_length", 70.0, 50.0, "monitor");
        let active = book.get("threshold_queue_length").unwrap();
        assert!(!active.resolved);
    }

    #[test]
    fn resolving_an_unraised_metric_is_a_no_op() {
        let mut book = AlertBook::new();
        book.resolve_threshold("disk_usage");
        assert!(book.list(false).is_empty());
    }

    #[test]
    fn one_shot_ids_are_unique() {
        let mut book = AlertBook::new();
        let a = book.one_shot(
            AlertLevel::Error,
            "task failed",
            "task x failed",
            "scheduler",
            HashMap::new(),
        );
        let b = book.one_shot(
            AlertLevel::Error,
            "task failed",
            "task y failed",
            "scheduler",
            HashMap::new(),
        );
        assert_ne!(a, b);
        assert_eq!(book.list(true).len(), 2);
    }
}
