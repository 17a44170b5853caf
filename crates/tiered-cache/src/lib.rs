use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use council_core::{CouncilError, CouncilResult, DataCategory, DataPayload, MarketType};
use data_federation::DataFederation;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sqlx::{AnyPool, Row};
use tokio::sync::Mutex;

mod entry;
mod schema;

pub use entry::{cache_key, fmt_ts, parse_ts, ttl, CachedEntry, SCHEMA_VERSION};
pub use schema::init_schema;

/// Rows deleted per sweep batch; keeps each statement short-lived.
const CLEANUP_CHUNK: i64 = 500;

const NEWS_RETENTION_DAYS: i64 = 30;
const BARS_RETENTION_DAYS: i64 = 365;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub expired_entries: u64,
    pub pruned_news: u64,
    pub pruned_bars: u64,
}

/// Two cache tiers in series over the federation: redis for fast TTL'd
/// reads, the document tables for durability and cold-process warmup.
pub struct TieredCache {
    hot: Option<redis::aio::ConnectionManager>,
    db: AnyPool,
    federation: Arc<DataFederation>,
    /// Per-key gates coalescing concurrent misses into one fetch.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TieredCache {
    pub fn new(
        hot: Option<redis::aio::ConnectionManager>,
        db: AnyPool,
        federation: Arc<DataFederation>,
    ) -> Self {
        if hot.is_none() {
            tracing::warn!("hot tier disabled, serving from durable tier only");
        }
        Self {
            hot,
            db,
            federation,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn federation(&self) -> &DataFederation {
        &self.federation
    }

    /// Read path: hot tier, then durable mirror (repopulating hot), then
    /// a single-flight federation fetch with write-through. Force refresh
    /// bypasses both tiers but still coalesces with other refreshers.
    pub async fn get_data(
        &self,
        symbol: &str,
        market: MarketType,
        category: DataCategory,
        start: NaiveDate,
        end: NaiveDate,
        force_refresh: bool,
    ) -> CouncilResult<CachedEntry> {
        let key = cache_key(symbol, category);

        if !force_refresh {
            if let Some(entry) = self.read_tiers(&key, symbol, category).await {
                return Ok(entry);
            }
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = gate.lock().await;

        // Double check under the gate: a concurrent leader may have
        // populated while we waited.
        if !force_refresh {
            if let Some(entry) = self.read_tiers(&key, symbol, category).await {
                drop(guard);
                self.inflight.lock().await.remove(&key);
                return Ok(entry);
            }
        }

        let result = self
            .federation
            .fetch(symbol, market, category, start, end)
            .await;
        let outcome = match result {
            Ok(record) => {
                let entry = CachedEntry::from_record(symbol, &record);
                self.write_through(&entry).await;
                Ok(entry)
            }
            Err(err) => Err(err),
        };

        drop(guard);
        self.inflight.lock().await.remove(&key);
        outcome
    }

    async fn read_tiers(
        &self,
        key: &str,
        symbol: &str,
        category: DataCategory,
    ) -> Option<CachedEntry> {
        let now = Utc::now();

        if let Some(entry) = self.read_hot(key).await {
            if entry.is_fresh(now) {
                return Some(entry);
            }
        }

        if let Some(entry) = self.read_durable(symbol, category).await {
            if entry.is_fresh(now) {
                self.write_hot(&entry).await;
                return Some(entry);
            }
        }

        None
    }

    async fn read_hot(&self, key: &str) -> Option<CachedEntry> {
        let hot = self.hot.as_ref()?;
        let mut conn = hot.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "hot tier read failed");
                None
            }
        }
    }

    async fn write_hot(&self, entry: &CachedEntry) {
        let Some(hot) = self.hot.as_ref() else {
            return;
        };
        let ttl_secs = (entry.expires_at - Utc::now()).num_seconds();
        if ttl_secs <= 0 {
            return;
        }
        let key = cache_key(&entry.symbol, entry.category);
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "cache entry serialization failed");
                return;
            }
        };
        let mut conn = hot.clone();
        if let Err(err) = conn
            .set_ex::<_, _, ()>(&key, raw, ttl_secs as u64)
            .await
        {
            tracing::warn!(key = %key, error = %err, "hot tier write failed");
        }
    }

    async fn read_durable(&self, symbol: &str, category: DataCategory) -> Option<CachedEntry> {
        let row = sqlx::query(
            "SELECT payload, expires_at FROM cached_data WHERE symbol = ? AND data_type = ?",
        )
        .bind(symbol)
        .bind(category.as_key())
        .fetch_optional(&self.db)
        .await
        .map_err(|err| tracing::warn!(symbol, error = %err, "durable tier read failed"))
        .ok()??;

        let raw: String = row.try_get("payload").ok()?;
        let mut entry: CachedEntry = serde_json::from_str(&raw).ok()?;
        // The column is authoritative for expiry; operators may age
        // entries without rewriting payloads.
        let expires_raw: String = row.try_get("expires_at").ok()?;
        if let Some(expires) = parse_ts(&expires_raw) {
            entry.expires_at = expires;
        }
        Some(entry)
    }

    /// Populate both tiers plus the per-category collection, then bump
    /// the daily fetch report.
    async fn write_through(&self, entry: &CachedEntry) {
        self.write_hot(entry).await;

        if let Err(err) = self.write_durable_mirror(entry).await {
            tracing::warn!(symbol = %entry.symbol, error = %err, "durable mirror write failed");
        }
        if let Err(err) = self.write_category(entry).await {
            tracing::warn!(symbol = %entry.symbol, error = %err, "category table write failed");
        }
        if let Err(err) = self.record_report(entry).await {
            tracing::debug!(symbol = %entry.symbol, error = %err, "daily report update failed");
        }
    }

    async fn write_durable_mirror(&self, entry: &CachedEntry) -> Result<(), sqlx::Error> {
        let ser = serde_json::to_string(entry);
        if let Err(e) = &ser {
            eprintln!("DEBUG serialize error: {}", e);
        }
        let raw = ser.unwrap_or_default();
        eprintln!("DEBUG write raw len={}", raw.len());
        sqlx::query(
            "INSERT INTO cached_data (symbol, data_type, payload, source, fetched_at, expires_at, schema_version)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (symbol, data_type) DO UPDATE SET
                payload = excluded.payload,
                source = excluded.source,
                fetched_at = excluded.fetched_at,
                expires_at = excluded.expires_at,
                schema_version = excluded.schema_version",
        )
        .bind(&entry.symbol)
        .bind(entry.category.as_key())
        .bind(raw)
        .bind(entry.source.as_str())
        .bind(fmt_ts(entry.fetched_at))
        .bind(fmt_ts(entry.expires_at))
        .bind(&entry.schema_version)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn write_category(&self, entry: &CachedEntry) -> Result<(), sqlx::Error> {
        match &entry.payload {
            DataPayload::StockInfo(info) => {
                sqlx::query(
                    "INSERT INTO stock_info (symbol, name, market, industry, currency, exchange, list_date, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (symbol) DO UPDATE SET
                        name = excluded.name,
                        market = excluded.market,
                        industry = excluded.industry,
                        currency = excluded.currency,
                        exchange = excluded.exchange,
                        list_date = excluded.list_date,
                        updated_at = excluded.updated_at",
                )
                .bind(&info.symbol)
                .bind(&info.name)
                .bind(info.market.as_key())
                .bind(info.industry.as_deref())
                .bind(info.currency.as_deref())
                .bind(info.exchange.as_deref())
                .bind(info.list_date.map(|d| d.to_string()))
                .bind(fmt_ts(entry.fetched_at))
                .execute(&self.db)
                .await?;
            }
            DataPayload::PriceBars(bars) => {
                for bar in bars {
                    sqlx::query(
                        "INSERT INTO stock_data (symbol, date, open, high, low, close, volume, amount, source)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT (symbol, date) DO UPDATE SET
                            open = excluded.open,
                            high = excluded.high,
                            low = excluded.low,
                            close = excluded.close,
                            volume = excluded.volume,
                            amount = excluded.amount,
                            source = excluded.source",
                    )
                    .bind(&entry.symbol)
                    .bind(bar.date.to_string())
                    .bind(bar.open)
                    .bind(bar.high)
                    .bind(bar.low)
                    .bind(bar.close)
                    .bind(bar.volume)
                    .bind(bar.amount)
                    .bind(entry.source.as_str())
                    .execute(&self.db)
                    .await?;
                }
            }
            DataPayload::Fundamentals(reports) => {
                for report in reports {
                    sqlx::query(
                        "INSERT INTO fundamentals (symbol, report_date, ratios, source)
                         VALUES (?, ?, ?, ?)
                         ON CONFLICT (symbol, report_date) DO UPDATE SET
                            ratios = excluded.ratios,
                            source = excluded.source",
                    )
                    .bind(&report.symbol)
                    .bind(report.report_date.to_string())
                    .bind(serde_json::to_string(&report.ratios).unwrap_or_default())
                    .bind(entry.source.as_str())
                    .execute(&self.db)
                    .await?;
                }
            }
            DataPayload::News(items) => {
                for item in items {
                    sqlx::query(
                        "INSERT INTO news (symbol, title, publish_time, content, source, url, sentiment)
                         VALUES (?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT (symbol, title, publish_time) DO NOTHING",
                    )
                    .bind(&entry.symbol)
                    .bind(&item.title)
                    .bind(fmt_ts(item.publish_time))
                    .bind(&item.content)
                    .bind(&item.source)
                    .bind(item.url.as_deref())
                    .bind(item.sentiment)
                    .execute(&self.db)
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn record_report(&self, entry: &CachedEntry) -> Result<(), sqlx::Error> {
        let count = match &entry.payload {
            DataPayload::StockInfo(_) => 1i64,
            DataPayload::PriceBars(bars) => bars.len() as i64,
            DataPayload::Fundamentals(reports) => reports.len() as i64,
            DataPayload::News(items) => items.len() as i64,
        };
        sqlx::query(
            "INSERT INTO data_reports (report_date, symbol, data_type, source, record_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (report_date, symbol, data_type) DO UPDATE SET
                source = excluded.source,
                record_count = excluded.record_count,
                created_at = excluded.created_at",
        )
        .bind(entry.fetched_at.date_naive().to_string())
        .bind(&entry.symbol)
        .bind(entry.category.as_key())
        .bind(entry.source.as_str())
        .bind(count)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Retention sweep: expired mirror entries, stale news, ancient bars.
    /// Batched so no statement touches more than `CLEANUP_CHUNK` rows,
    /// and idempotent: a second run right after finds nothing left.
    pub async fn run_cleanup(&self) -> CouncilResult<CleanupReport> {
        let now = Utc::now();
        let mut report = CleanupReport::default();

        report.expired_entries = self
            .delete_batched(
                "SELECT symbol, data_type FROM cached_data WHERE expires_at < ? LIMIT ?",
                "DELETE FROM cached_data WHERE symbol = ? AND data_type = ?",
                &fmt_ts(now),
            )
            .await?;

        let news_cutoff = fmt_ts(now - chrono::Duration::days(NEWS_RETENTION_DAYS));
        report.pruned_news = self.prune_news(&news_cutoff).await?;

        let bars_cutoff = (now - chrono::Duration::days(BARS_RETENTION_DAYS))
            .date_naive()
            .to_string();
        report.pruned_bars = self
            .delete_batched(
                "SELECT symbol, date FROM stock_data WHERE date < ? LIMIT ?",
                "DELETE FROM stock_data WHERE symbol = ? AND date = ?",
                &bars_cutoff,
            )
            .await?;

        if report.expired_entries + report.pruned_news + report.pruned_bars > 0 {
            tracing::info!(
                expired = report.expired_entries,
                news = report.pruned_news,
                bars = report.pruned_bars,
                "cache cleanup removed rows"
            );
        }
        Ok(report)
    }

    async fn prune_news(&self, cutoff: &str) -> CouncilResult<u64> {
        let mut removed = 0u64;
        loop {
            let rows = sqlx::query(
                "SELECT symbol, title, publish_time FROM news WHERE publish_time < ? LIMIT ?",
            )
            .bind(cutoff)
            .bind(CLEANUP_CHUNK)
            .fetch_all(&self.db)
            .await
            .map_err(|e| CouncilError::Internal(format!("cleanup select failed: {e}")))?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let symbol: String = row
                    .try_get(0)
                    .map_err(|e| CouncilError::Internal(format!("cleanup row decode: {e}")))?;
                let title: String = row
                    .try_get(1)
                    .map_err(|e| CouncilError::Internal(format!("cleanup row decode: {e}")))?;
                let publish_time: String = row
                    .try_get(2)
                    .map_err(|e| CouncilError::Internal(format!("cleanup row decode: {e}")))?;
                sqlx::query(
                    "DELETE FROM news WHERE symbol = ? AND title = ? AND publish_time = ?",
                )
                .bind(&symbol)
                .bind(&title)
                .bind(&publish_time)
                .execute(&self.db)
                .await
                .map_err(|e| CouncilError::Internal(format!("cleanup delete failed: {e}")))?;
                removed += 1;
            }

            if (rows.len() as i64) < CLEANUP_CHUNK {
                break;
            }
        }
        Ok(removed)
    }

    async fn delete_batched(
        &self,
        select_sql: &str,
        delete_sql: &str,
        cutoff: &str,
    ) -> CouncilResult<u64> {
        let mut removed = 0u64;
        loop {
            let rows = sqlx::query(select_sql)
                .bind(cutoff)
                .bind(CLEANUP_CHUNK)
                .fetch_all(&self.db)
                .await
                .map_err(|e| CouncilError::Internal(format!("cleanup select failed: {e}")))?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let k1: String = row
                    .try_get(0)
                    .map_err(|e| CouncilError::Internal(format!("cleanup row decode: {e}")))?;
                let k2: String = row
                    .try_get(1)
                    .map_err(|e| CouncilError::Internal(format!("cleanup row decode: {e}")))?;
                sqlx::query(delete_sql)
                    .bind(&k1)
                    .bind(&k2)
                    .execute(&self.db)
                    .await
                    .map_err(|e| CouncilError::Internal(format!("cleanup delete failed: {e}")))?;
                removed += 1;
            }

            if (rows.len() as i64) < CLEANUP_CHUNK {
                break;
            }
        }
        Ok(removed)
    }

    /// Hourly retention sweep.
    pub fn spawn_cleanup_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = cache.run_cleanup().await {
                    tracing::error!(error = %err, "cache cleanup sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests;
