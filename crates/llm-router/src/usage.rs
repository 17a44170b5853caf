use std::collections::HashMap;

use chrono::{DateTime, Utc};
use council_core::{CouncilError, CouncilResult};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::providers::model_facts;
use crate::types::TokenUsage;

const DETAIL_TTL_SECS: u64 = 86_400 * 7;
const HOURLY_TTL_SECS: u64 = 86_400 * 7;
const DAILY_TTL_SECS: u64 = 86_400 * 30;

/// One completed LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub model: String,
    pub task_type: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        user_id: &str,
        model: &str,
        task_type: &str,
        usage: TokenUsage,
        duration_secs: f64,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            model: model.to_string(),
            task_type: task_type.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cost: calculate_cost(model, usage),
            duration_secs,
            timestamp: Utc::now(),
        }
    }
}

/// Cost in USD: tokens x per-1k rates from the static model facts.
pub fn calculate_cost(model: &str, usage: TokenUsage) -> f64 {
    let Some((_, _, input_rate, output_rate, _)) = model_facts(model) else {
        tracing::debug!(model, "no pricing for model, recording zero cost");
        return 0.0;
    };
    usage.prompt_tokens as f64 * input_rate / 1000.0
        + usage.completion_tokens as f64 * output_rate / 1000.0
}

/// Rolling aggregate kept per day, hour, user, and model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedUsage {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_duration: f64,
    #[serde(default)]
    pub models: HashMap<String, BucketUsage>,
    #[serde(default)]
    pub task_types: HashMap<String, BucketUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketUsage {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
}

impl AggregatedUsage {
    fn absorb(&mut self, record: &UsageRecord) {
        self.total_requests += 1;
        self.total_tokens += record.total_tokens as u64;
        self.total_cost += record.cost;
        self.total_duration += record.duration_secs;

        let model = self.models.entry(record.model.clone()).or_default();
        model.requests += 1;
        model.tokens += record.total_tokens as u64;
        model.cost += record.cost;

        let task = self.task_types.entry(record.task_type.clone()).or_default();
        task.requests += 1;
        task.tokens += record.total_tokens as u64;
        task.cost += record.cost;
    }

    fn merge(&mut self, other: &AggregatedUsage) {
        self.total_requests += other.total_requests;
        self.total_tokens += other.total_tokens;
        self.total_cost += other.total_cost;
        self.total_duration += other.total_duration;
        for (k, v) in &other.models {
            let bucket = self.models.entry(k.clone()).or_default();
            bucket.requests += v.requests;
            bucket.tokens += v.tokens;
            bucket.cost += v.cost;
        }
        for (k, v) in &other.task_types {
            let bucket = self.task_types.entry(k.clone()).or_default();
            bucket.requests += v.requests;
            bucket.tokens += v.tokens;
            bucket.cost += v.cost;
        }
    }
}

/// Usage and cost metering over the hot tier. Every write is best
/// effort: a metering failure must never fail the completion it meters.
pub struct UsageTracker {
    redis: Option<redis::aio::ConnectionManager>,
}

impl UsageTracker {
    pub fn new(redis: Option<redis::aio::ConnectionManager>) -> Self {
        Self { redis }
    }

    pub async fn track(&self, record: UsageRecord) {
        tracing::info!(
            user = %record.user_id,
            model = %record.model,
            task_type = %record.task_type,
            tokens = record.total_tokens,
            cost = format!("{:.6}", record.cost),
            duration = format!("{:.2}", record.duration_secs),
            "llm usage"
        );

        let Some(redis) = self.redis.as_ref() else {
            return;
        };
        let mut conn = redis.clone();

        let date_key = record.timestamp.format("%Y-%m-%d").to_string();
        let hour_key = record.timestamp.format("%Y-%m-%d:%H").to_string();

        if let Ok(raw) = serde_json::to_string(&record) {
            let detail_key = format!("llm:usage:detail:{}", record.timestamp.to_rfc3339());
            if let Err(err) = conn
                .set_ex::<_, _, ()>(&detail_key, raw, DETAIL_TTL_SECS)
                .await
            {
                tracing::warn!(error = %err, "usage detail write failed");
            }
        }

        for (key, ttl) in [
            (format!("llm:usage:daily:{date_key}"), DAILY_TTL_SECS),
            (format!("llm:usage:hourly:{hour_key}"), HOURLY_TTL_SECS),
            (
                format!("llm:usage:user:{}:{date_key}", record.user_id),
                DAILY_TTL_SECS,
            ),
            (
                format!("llm:usage:model:{}:{date_key}", record.model),
                DAILY_TTL_SECS,
            ),
        ] {
            if let Err(err) = update_aggregate(&mut conn, &key, &record, ttl).await {
                tracing::warn!(key, error = %err, "usage aggregate update failed");
            }
        }
    }

    /// Sum of daily aggregates over the last `days`, optionally scoped
    /// to one user or model.
    pub async fn stats(
        &self,
        days: i64,
        user_id: Option<&str>,
        model: Option<&str>,
    ) -> CouncilResult<AggregatedUsage> {
        let Some(redis) = self.redis.as_ref() else {
            return Err(CouncilError::Unavailable(
                "usage tracking requires the hot tier".to_string(),
            ));
        };
        let mut conn = redis.clone();

        let mut total = AggregatedUsage::default();
        let today = Utc::now().date_naive();
        for offset in 0..days.max(1) {
            let date = today - chrono::Duration::days(offset);
            let key = match (user_id, model) {
                (Some(user), _) => format!("llm:usage:user:{user}:{date}"),
                (None, Some(model)) => format!("llm:usage:model:{model}:{date}"),
                (None, None) => format!("llm:usage:daily:{date}"),
            };
            match conn.get::<_, Option<String>>(&key).await {
                Ok(Some(raw)) => {
                    if let Ok(day) = serde_json::from_str::<AggregatedUsage>(&raw) {
                        total.merge(&day);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    return Err(CouncilError::Unavailable(format!(
                        "usage read failed: {err}"
                    )))
                }
            }
        }
        Ok(total)
    }
}

async fn update_aggregate(
    conn: &mut redis::aio::ConnectionManager,
    key: &str,
    record: &UsageRecord,
    ttl: u64,
) -> Result<(), redis::RedisError> {
    let existing: Option<String> = conn.get(key).await?;
    let mut stats: AggregatedUsage = existing
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    stats.absorb(record);
    let raw = serde_json::to_string(&stats).unwrap_or_default();
    conn.set_ex::<_, _, ()>(key, raw, ttl).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_uses_split_input_output_rates() {
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
        };
        let cost = calculate_cost("gpt-4", usage);
        assert!((cost - (0.03 + 0.5 * 0.06)).abs() < 1e-9);

        assert_eq!(calculate_cost("unknown-model", usage), 0.0);
    }

    #[test]
    fn aggregates_absorb_per_model_and_task() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 100,
            total_tokens: 200,
        };
        let mut agg = AggregatedUsage::default();
        agg.absorb(&UsageRecord::new("u1", "deepseek-chat", "reasoning", usage, 1.2));
        agg.absorb(&UsageRecord::new("u1", "gpt-4", "reasoning", usage, 0.8));

        assert_eq!(agg.total_requests, 2);
        assert_eq!(agg.total_tokens, 400);
        assert_eq!(agg.models.len(), 2);
        assert_eq!(agg.task_types["reasoning"].requests, 2);
    }
}
