use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use council_core::{
    CouncilResult, DataCategory, FundamentalReport, MarketType, NewsItem, PriceBar, SourceTag,
    StockInfo,
};

mod akshare;
mod alpha_vantage;
mod baostock;
mod finnhub;
mod http;
mod limiter;
mod registry;
mod state;
mod tushare;
mod twelve_data;
mod yfinance;

pub use akshare::AkshareSource;
pub use alpha_vantage::AlphaVantageSource;
pub use baostock::BaostockSource;
pub use finnhub::FinnhubSource;
pub use limiter::RateLimiter;
pub use registry::{RegisteredSource, SourceRegistry};
pub use state::{SourceState, SourceStats, SourceStatus};
pub use tushare::TushareSource;
pub use twelve_data::TwelveDataSource;
pub use yfinance::YfinanceSource;

/// A market-data provider adapter. Implementations are pure fetchers that
/// normalize provider shapes into `council-core` records; availability
/// bookkeeping (status, error budget, rate limiting) lives with the
/// federation, which owns the per-source `SourceState`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn tag(&self) -> SourceTag;

    fn supported_markets(&self) -> &[MarketType];

    fn supported_categories(&self) -> &[DataCategory];

    /// Per-call deadline the federation applies around every fetch.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Declared requests-per-minute cap for this provider.
    fn rate_limit_per_minute(&self) -> usize {
        60
    }

    fn can_handle(&self, market: MarketType, category: DataCategory) -> bool {
        self.supported_markets().contains(&market)
            && self.supported_categories().contains(&category)
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo>;

    async fn price_bars(
        &self,
        symbol: &str,
        market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>>;

    async fn fundamentals(
        &self,
        symbol: &str,
        market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<FundamentalReport>>;

    async fn news(
        &self,
        symbol: &str,
        market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>>;

    /// Cheap availability probe used by the background health sweep. Must
    /// not burn metered quota; hitting an unauthenticated endpoint or
    /// checking configuration is enough.
    async fn health_check(&self) -> bool;
}
