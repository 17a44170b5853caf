use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use council_core::{DataCategory, DataPayload, DataRecord, SourceTag};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "1.0";

/// Per-category freshness windows.
pub fn ttl(category: DataCategory) -> Duration {
    match category {
        DataCategory::BasicInfo => Duration::hours(24),
        DataCategory::PriceData => Duration::hours(1),
        DataCategory::Fundamentals => Duration::hours(6),
        DataCategory::News => Duration::minutes(30),
        DataCategory::Technical => Duration::hours(2),
    }
}

/// Hot-tier key: `data:{symbol}:{category}`.
pub fn cache_key(symbol: &str, category: DataCategory) -> String {
    format!("data:{symbol}:{}", category.as_key())
}

/// What both tiers store per (symbol, category).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub symbol: String,
    pub category: DataCategory,
    pub payload: DataPayload,
    pub source: SourceTag,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub schema_version: String,
}

impl CachedEntry {
    pub fn from_record(symbol: &str, record: &DataRecord) -> Self {
        let fetched_at = record.fetched_at;
        Self {
            symbol: symbol.to_string(),
            category: record.category,
            payload: record.payload.clone(),
            source: record.source,
            fetched_at,
            expires_at: fetched_at + ttl(record.category),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Fixed-width UTC timestamp format used in durable-tier columns. The
/// Any driver only binds primitive types, and this format compares
/// lexicographically, which the sweep's range deletes rely on.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_table_matches_categories() {
        assert_eq!(ttl(DataCategory::BasicInfo), Duration::hours(24));
        assert_eq!(ttl(DataCategory::PriceData), Duration::hours(1));
        assert_eq!(ttl(DataCategory::Fundamentals), Duration::hours(6));
        assert_eq!(ttl(DataCategory::News), Duration::minutes(30));
        assert_eq!(ttl(DataCategory::Technical), Duration::hours(2));
    }

    #[test]
    fn timestamp_format_round_trips_and_orders() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).unwrap();
        assert_eq!(fmt_ts(now), fmt_ts(parsed));

        let earlier = now - Duration::hours(1);
        assert!(fmt_ts(earlier) < fmt_ts(now));
    }
}
