use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use council_core::{
    CouncilError, CouncilResult, DataCategory, DataPayload, FundamentalReport, MarketType,
    NewsItem, PriceBar, SourceTag, StockInfo,
};
use data_federation::{DataFederation, ProfileManager};
use data_sources::{MarketDataSource, SourceRegistry};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use super::*;

const ALL_MARKETS: &[MarketType] = &[MarketType::CnA, MarketType::Hk, MarketType::Us];
const ALL_CATEGORIES: &[DataCategory] = &[
    DataCategory::BasicInfo,
    DataCategory::PriceData,
    DataCategory::Fundamentals,
    DataCategory::News,
    DataCategory::Technical,
];

/// Counting stub source; optionally sleeps to widen the single-flight
/// race window.
struct CountingSource {
    calls: Arc<AtomicU32>,
    delay: Duration,
}

#[async_trait]
impl MarketDataSource for CountingSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Tushare
    }

    fn supported_markets(&self) -> &[MarketType] {
        ALL_MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        ALL_CATEGORIES
    }

    async fn stock_info(&self, _: &str, _: MarketType) -> CouncilResult<StockInfo> {
        Err(CouncilError::Unavailable("stub".into()))
    }

    async fn price_bars(
        &self,
        _: &str,
        _: MarketType,
        _: NaiveDate,
        _: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![PriceBar {
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            volume: 1_000.0,
            amount: Some(10_500.0),
        }])
    }

    async fn fundamentals(
        &self,
        _: &str,
        _: MarketType,
        _: NaiveDate,
        _: NaiveDate,
    ) -> CouncilResult<Vec<FundamentalReport>> {
        Err(CouncilError::Unavailable("stub".into()))
    }

    async fn news(
        &self,
        _: &str,
        _: MarketType,
        _: NaiveDate,
        _: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>> {
        Err(CouncilError::Unavailable("stub".into()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

static DRIVERS: std::sync::Once = std::sync::Once::new();

async fn memory_pool() -> AnyPool {
    DRIVERS.call_once(sqlx::any::install_default_drivers);
    // A pool larger than one connection would open distinct in-memory
    // databases.
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    init_schema(&pool).await.expect("schema");
    pool
}

async fn cache_with_stub(delay: Duration) -> (Arc<TieredCache>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let registry = Arc::new(SourceRegistry::from_adapters(vec![Arc::new(
        CountingSource {
            calls: Arc::clone(&calls),
            delay,
        },
    )]));
    let profiles = Arc::new(ProfileManager::with_defaults());
    let federation = Arc::new(DataFederation::new(registry, profiles));
    let cache = Arc::new(TieredCache::new(None, memory_pool().await, federation));
    (cache, calls)
}

fn range() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
    )
}

#[tokio::test]
async fn fresh_read_does_not_refetch() {
    let (cache, calls) = cache_with_stub(Duration::ZERO).await;
    let (start, end) = range();

    let first = cache
        .get_data("000858", MarketType::CnA, DataCategory::PriceData, start, end, false)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = cache
        .get_data("000858", MarketType::CnA, DataCategory::PriceData, start, end, false)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1, "fresh entry must be served from cache");

    let (DataPayload::PriceBars(a), DataPayload::PriceBars(b)) = (&first.payload, &second.payload)
    else {
        panic!("expected price bars");
    };
    assert_eq!(a.len(), b.len());
    assert_eq!(first.source, SourceTag::Tushare);
    assert!(second.is_fresh(Utc::now()));
}

#[tokio::test]
async fn expired_entry_triggers_refetch() {
    let (cache, calls) = cache_with_stub(Duration::ZERO).await;
    let (start, end) = range();

    cache
        .get_data("000858", MarketType::CnA, DataCategory::PriceData, start, end, false)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Age the durable mirror past its TTL.
    let past = fmt_ts(Utc::now() - chrono::Duration::hours(2));
    sqlx::query("UPDATE cached_data SET expires_at = ? WHERE symbol = ?")
        .bind(&past)
        .bind("000858")
        .execute(cache_pool(&cache))
        .await
        .unwrap();

    cache
        .get_data("000858", MarketType::CnA, DataCategory::PriceData, start, end, false)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2, "stale entry must refetch");
}

#[tokio::test]
async fn force_refresh_bypasses_tiers() {
    let (cache, calls) = cache_with_stub(Duration::ZERO).await;
    let (start, end) = range();

    cache
        .get_data("AAPL", MarketType::Us, DataCategory::PriceData, start, end, false)
        .await
        .unwrap();
    cache
        .get_data("AAPL", MarketType::Us, DataCategory::PriceData, start, end, true)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_misses_coalesce_to_one_fetch() {
    let (cache, calls) = cache_with_stub(Duration::from_millis(100)).await;
    let (start, end) = range();

    let a = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_data("000858", MarketType::CnA, DataCategory::PriceData, start, end, false)
                .await
        })
    };
    let b = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_data("000858", MarketType::CnA, DataCategory::PriceData, start, end, false)
                .await
        })
    };

    let (ra, rb) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "misses must coalesce");
    assert_eq!(
        serde_json::to_string(&ra.payload).unwrap(),
        serde_json::to_string(&rb.payload).unwrap(),
        "followers receive the leader's payload"
    );
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let (cache, _) = cache_with_stub(Duration::ZERO).await;
    let pool = cache_pool(&cache);

    let past = fmt_ts(Utc::now() - chrono::Duration::hours(3));
    for symbol in ["A", "B", "C"] {
        sqlx::query(
            "INSERT INTO cached_data (symbol, data_type, payload, source, fetched_at, expires_at, schema_version)
             VALUES (?, 'price_data', '{}', 'tushare', ?, ?, '1.0')",
        )
        .bind(symbol)
        .bind(&past)
        .bind(&past)
        .execute(pool)
        .await
        .unwrap();
    }
    let old_news = fmt_ts(Utc::now() - chrono::Duration::days(45));
    sqlx::query(
        "INSERT INTO news (symbol, title, publish_time, content, source) VALUES ('A', 'old story', ?, '', 'stub')",
    )
    .bind(&old_news)
    .execute(pool)
    .await
    .unwrap();

    let first = cache.run_cleanup().await.unwrap();
    assert_eq!(first.expired_entries, 3);
    assert_eq!(first.pruned_news, 1);

    let second = cache.run_cleanup().await.unwrap();
    assert_eq!(second.expired_entries, 0);
    assert_eq!(second.pruned_news, 0);
}

/// Tests poke the pool directly to age rows.
fn cache_pool(cache: &TieredCache) -> &AnyPool {
    &cache.db
}
