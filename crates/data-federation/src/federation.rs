use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use council_core::{
    CouncilError, CouncilResult, DataCategory, DataPayload, DataRecord, MarketType,
};
use data_sources::{MarketDataSource, RegisteredSource, SourceRegistry, SourceStats, SourceStatus};

use crate::profiles::ProfileManager;

/// Cadence of the background availability sweep.
const HEALTH_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Federated fetch over the registered sources, ordered by the active
/// priority profile. Owns all mutation of per-source state.
pub struct DataFederation {
    registry: Arc<SourceRegistry>,
    profiles: Arc<ProfileManager>,
    #[cfg(feature = "legacy-fallback")]
    legacy: Option<Arc<dyn MarketDataSource>>,
}

impl DataFederation {
    pub fn new(registry: Arc<SourceRegistry>, profiles: Arc<ProfileManager>) -> Self {
        Self {
            registry,
            profiles,
            #[cfg(feature = "legacy-fallback")]
            legacy: None,
        }
    }

    #[cfg(feature = "legacy-fallback")]
    pub fn with_legacy_fallback(mut self, adapter: Arc<dyn MarketDataSource>) -> Self {
        self.legacy = Some(adapter);
        self
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    pub fn source_stats(&self) -> Vec<SourceStats> {
        self.registry.stats()
    }

    /// Fetch one normalized record set, walking the priority list and
    /// failing over until a source succeeds.
    pub async fn fetch(
        &self,
        symbol: &str,
        market: MarketType,
        category: DataCategory,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<DataRecord> {
        let config = self.profiles.active();
        let order = config.lookup(market, category);

        if order.is_empty() {
            return Err(CouncilError::Validation(format!(
                "no priority list configured for {}_{}",
                market.as_key(),
                category.as_key()
            )));
        }

        let mut last_err: Option<CouncilError> = None;

        for tag in order {
            let Some(source) = self.registry.get(*tag) else {
                tracing::debug!(source = %tag, "source not registered, skipping");
                continue;
            };

            if !source.adapter.can_handle(market, category) {
                continue;
            }
            match source.state.status() {
                SourceStatus::Available => {}
                status => {
                    tracing::debug!(source = %tag, ?status, "source not available, skipping");
                    continue;
                }
            }
            if !source.limiter.try_acquire() {
                source.state.set_status(SourceStatus::RateLimited);
                tracing::debug!(source = %tag, "per-minute cap reached, skipping");
                continue;
            }

            match self.try_source(source, symbol, market, category, start, end).await {
                Ok(payload) => {
                    source.state.record_success();
                    return Ok(DataRecord {
                        source: *tag,
                        market,
                        category,
                        fetched_at: Utc::now(),
                        payload,
                    });
                }
                Err(err) => {
                    match &err {
                        CouncilError::RateLimited(_) => {
                            source.state.set_status(SourceStatus::RateLimited);
                        }
                        CouncilError::Auth(_) => {
                            source.state.set_status(SourceStatus::Unavailable);
                        }
                        _ => source.state.record_error(),
                    }
                    tracing::warn!(
                        source = %tag,
                        symbol,
                        category = %category,
                        error = %err,
                        "source fetch failed, trying next"
                    );
                    last_err = Some(err);
                }
            }
        }

        #[cfg(feature = "legacy-fallback")]
        if let Some(legacy) = &self.legacy {
            tracing::warn!(symbol, category = %category, "all profiled sources failed, using legacy aggregate");
            if let Ok(payload) =
                dispatch(legacy.as_ref(), symbol, market, category, start, end).await
            {
                return Ok(DataRecord {
                    source: legacy.tag(),
                    market,
                    category,
                    fetched_at: Utc::now(),
                    payload,
                });
            }
        }

        Err(last_err.unwrap_or_else(|| {
            CouncilError::NotFound(format!(
                "no data for {symbol} ({}, {})",
                market.as_key(),
                category.as_key()
            ))
        }))
    }

    async fn try_source(
        &self,
        source: &RegisteredSource,
        symbol: &str,
        market: MarketType,
        category: DataCategory,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<DataPayload> {
        source.state.record_request();
        let deadline = source.adapter.timeout();
        let fetch = dispatch(source.adapter.as_ref(), symbol, market, category, start, end);

        match tokio::time::timeout(deadline, fetch).await {
            Ok(result) => result,
            Err(_) => Err(CouncilError::Timeout(format!(
                "{}: fetch exceeded {deadline:?}",
                source.tag()
            ))),
        }
    }

    /// Spawn the 30 s availability sweep. A probe failure flags the
    /// source UNAVAILABLE; a probe success restores AVAILABLE only from
    /// UNAVAILABLE or RATE_LIMITED; ERROR heals through a real request.
    pub fn spawn_health_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let federation = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                federation.run_health_sweep().await;
            }
        })
    }

    pub async fn run_health_sweep(&self) {
        for source in self.registry.iter() {
            let healthy = source.adapter.health_check().await;
            let status = source.state.status();
            match (healthy, status) {
                (false, SourceStatus::Available) => {
                    source.state.set_status(SourceStatus::Unavailable);
                }
                (true, SourceStatus::Unavailable | SourceStatus::RateLimited) => {
                    source.state.set_status(SourceStatus::Available);
                }
                _ => {}
            }
        }
    }
}

async fn dispatch(
    adapter: &dyn MarketDataSource,
    symbol: &str,
    market: MarketType,
    category: DataCategory,
    start: NaiveDate,
    end: NaiveDate,
) -> CouncilResult<DataPayload> {
    match category {
        DataCategory::BasicInfo => adapter
            .stock_info(symbol, market)
            .await
            .map(DataPayload::StockInfo),
        DataCategory::PriceData | DataCategory::Technical => adapter
            .price_bars(symbol, market, start, end)
            .await
            .map(DataPayload::PriceBars),
        DataCategory::Fundamentals => adapter
            .fundamentals(symbol, market, start, end)
            .await
            .map(DataPayload::Fundamentals),
        DataCategory::News => adapter
            .news(symbol, market, start, end)
            .await
            .map(DataPayload::News),
    }
}
