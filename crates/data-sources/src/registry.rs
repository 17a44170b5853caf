use std::sync::Arc;

use council_core::SourceTag;

use crate::limiter::RateLimiter;
use crate::state::{SourceState, SourceStats};
use crate::{
    AkshareSource, AlphaVantageSource, BaostockSource, FinnhubSource, MarketDataSource,
    TushareSource, TwelveDataSource, YfinanceSource,
};

/// One registered provider: the adapter plus the availability bookkeeping
/// the federation mutates on its behalf.
pub struct RegisteredSource {
    pub adapter: Arc<dyn MarketDataSource>,
    pub state: SourceState,
    pub limiter: RateLimiter,
}

impl RegisteredSource {
    pub fn new(adapter: Arc<dyn MarketDataSource>) -> Self {
        let limiter = RateLimiter::per_minute(adapter.rate_limit_per_minute());
        let state = SourceState::new(adapter.tag());
        Self {
            adapter,
            state,
            limiter,
        }
    }

    pub fn tag(&self) -> SourceTag {
        self.adapter.tag()
    }
}

/// Compile-time adapter registry. Adapters whose credentials are absent
/// are simply not registered; profiles referencing them fall through to
/// the next source.
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    pub fn from_env() -> Self {
        let mut sources: Vec<RegisteredSource> = Vec::new();

        let mut register = |tag: SourceTag, adapter: Arc<dyn MarketDataSource>| {
            tracing::info!(source = %tag, "registered data source");
            sources.push(RegisteredSource::new(adapter));
        };

        if let Ok(token) = std::env::var("TUSHARE_TOKEN") {
            if !token.is_empty() {
                register(SourceTag::Tushare, Arc::new(TushareSource::new(token)));
            }
        }
        if let Ok(url) = std::env::var("AKSHARE_SERVICE_URL") {
            if !url.is_empty() {
                register(SourceTag::Akshare, Arc::new(AkshareSource::new(url)));
            }
        }
        if let Ok(url) = std::env::var("BAOSTOCK_SERVICE_URL") {
            if !url.is_empty() {
                register(SourceTag::Baostock, Arc::new(BaostockSource::new(url)));
            }
        }
        // Yahoo needs no credentials.
        register(SourceTag::Yfinance, Arc::new(YfinanceSource::new()));

        if let Ok(key) = std::env::var("FINNHUB_API_KEY") {
            if !key.is_empty() {
                register(SourceTag::Finnhub, Arc::new(FinnhubSource::new(key)));
            }
        }
        if let Ok(key) = std::env::var("ALPHA_VANTAGE_API_KEY") {
            if !key.is_empty() {
                register(
                    SourceTag::AlphaVantage,
                    Arc::new(AlphaVantageSource::new(key)),
                );
            }
        }
        if let Ok(key) = std::env::var("TWELVE_DATA_API_KEY") {
            if !key.is_empty() {
                register(SourceTag::TwelveData, Arc::new(TwelveDataSource::new(key)));
            }
        }

        Self { sources }
    }

    /// Registry over explicit adapters; used by tests and custom wiring.
    pub fn from_adapters(adapters: Vec<Arc<dyn MarketDataSource>>) -> Self {
        Self {
            sources: adapters.into_iter().map(RegisteredSource::new).collect(),
        }
    }

    pub fn get(&self, tag: SourceTag) -> Option<&RegisteredSource> {
        self.sources.iter().find(|s| s.tag() == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn stats(&self) -> Vec<SourceStats> {
        self.sources.iter().map(|s| s.state.snapshot()).collect()
    }
}
