mod federation;
mod profiles;

pub use federation::DataFederation;
pub use profiles::{
    profile_key, CustomOverrides, PriorityConfig, ProfileEntry, ProfileFile, ProfileManager,
};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use council_core::{
        CouncilError, CouncilResult, DataCategory, DataPayload, FundamentalReport, MarketType,
        NewsItem, PriceBar, SourceTag, StockInfo,
    };
    use data_sources::{MarketDataSource, SourceRegistry, SourceStatus};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const ALL_MARKETS: &[MarketType] = &[MarketType::CnA, MarketType::Hk, MarketType::Us];
    const ALL_CATEGORIES: &[DataCategory] = &[
        DataCategory::BasicInfo,
        DataCategory::PriceData,
        DataCategory::Fundamentals,
        DataCategory::News,
        DataCategory::Technical,
    ];

    /// Stub source: fails every call when `failing`, otherwise returns a
    /// one-bar series tagged with its own identity.
    struct StubSource {
        tag: SourceTag,
        failing: bool,
        calls: AtomicU32,
    }

    impl StubSource {
        fn new(tag: SourceTag, failing: bool) -> Self {
            Self {
                tag,
                failing,
                calls: AtomicU32::new(0),
            }
        }

        fn bar() -> PriceBar {
            PriceBar {
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                open: 10.0,
                high: 11.0,
                low: 9.5,
                close: 10.5,
                volume: 1_000.0,
                amount: None,
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for StubSource {
        fn tag(&self) -> SourceTag {
            self.tag
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
            if self.failing {
                Err(CouncilError::Unavailable(format!("{} is down", self.tag)))
            } else {
                Ok(vec![Self::bar()])
            }
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

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        )
    }

    fn federation_with(
        primary_failing: bool,
    ) -> (Arc<DataFederation>, Arc<SourceRegistry>) {
        let registry = Arc::new(SourceRegistry::from_adapters(vec![
            Arc::new(StubSource::new(SourceTag::Tushare, primary_failing)),
            Arc::new(StubSource::new(SourceTag::Akshare, false)),
        ]));
        let profiles = Arc::new(ProfileManager::with_defaults());
        (
            Arc::new(DataFederation::new(Arc::clone(&registry), profiles)),
            registry,
        )
    }

    #[tokio::test]
    async fn healthy_primary_wins() {
        let (federation, _) = federation_with(false);
        let (start, end) = range();
        let record = federation
            .fetch("000858", MarketType::CnA, DataCategory::PriceData, start, end)
            .await
            .unwrap();
        assert_eq!(record.source, SourceTag::Tushare);
        assert!(matches!(record.payload, DataPayload::PriceBars(ref bars) if bars.len() == 1));
    }

    #[tokio::test]
    async fn failover_returns_secondary_result() {
        let (federation, registry) = federation_with(true);
        let (start, end) = range();
        let record = federation
            .fetch("000858", MarketType::CnA, DataCategory::PriceData, start, end)
            .await
            .unwrap();
        assert_eq!(record.source, SourceTag::Akshare);

        let primary = registry.get(SourceTag::Tushare).unwrap();
        assert_eq!(primary.state.error_count(), 1);
    }

    #[tokio::test]
    async fn error_budget_marks_primary_and_skips_it() {
        let (federation, registry) = federation_with(true);
        let (start, end) = range();

        // Error count grows monotonically across failures.
        let mut last_count = 0;
        for _ in 0..6 {
            let record = federation
                .fetch("000858", MarketType::CnA, DataCategory::PriceData, start, end)
                .await
                .unwrap();
            assert_eq!(record.source, SourceTag::Akshare);
            let count = registry.get(SourceTag::Tushare).unwrap().state.error_count();
            assert!(count > last_count);
            last_count = count;
        }

        let primary = registry.get(SourceTag::Tushare).unwrap();
        assert_eq!(primary.state.status(), SourceStatus::Error);
        let attempts_before = primary
            .state
            .snapshot()
            .request_count;

        // Once flagged ERROR the source is skipped without an attempt.
        federation
            .fetch("000858", MarketType::CnA, DataCategory::PriceData, start, end)
            .await
            .unwrap();
        assert_eq!(primary.state.snapshot().request_count, attempts_before);
    }

    #[tokio::test]
    async fn unconfigured_pair_is_a_validation_error() {
        let (federation, _) = federation_with(false);
        let (start, end) = range();
        // HK has no fundamentals list in the default profile.
        let err = federation
            .fetch("0700", MarketType::Hk, DataCategory::Fundamentals, start, end)
            .await
            .unwrap_err();
        assert!(matches!(err, CouncilError::Validation(_)));
    }
}
