use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use council_core::{
    CouncilError, CouncilResult, DataCategory, FundamentalReport, MarketType, NewsItem, PriceBar,
    SourceTag, StockInfo,
};
use reqwest::Client;
use serde::Deserialize;

use crate::http;
use crate::MarketDataSource;

const BASE_URL: &str = "https://api.twelvedata.com";

const MARKETS: &[MarketType] = &[MarketType::Us];
const CATEGORIES: &[DataCategory] = &[DataCategory::BasicInfo, DataCategory::PriceData];

/// Twelve Data adapter (US). Free tier: 8 requests/min.
pub struct TwelveDataSource {
    api_key: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TdTimeSeries {
    #[serde(default)]
    values: Option<Vec<TdBar>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TdBar {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TdProfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

impl TwelveDataSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http::build_client(Duration::from_secs(30)),
            base_url: BASE_URL.to_string(),
        }
    }

    fn check_status(code: Option<i64>, message: Option<String>) -> CouncilResult<()> {
        match code {
            Some(429) => Err(CouncilError::RateLimited(format!(
                "twelve_data: {}",
                message.unwrap_or_default()
            ))),
            Some(401) | Some(403) => Err(CouncilError::Auth(format!(
                "twelve_data: {}",
                message.unwrap_or_default()
            ))),
            Some(404) => Err(CouncilError::NotFound(format!(
                "twelve_data: {}",
                message.unwrap_or_default()
            ))),
            Some(_) => Err(CouncilError::Unavailable(format!(
                "twelve_data: {}",
                message.unwrap_or_default()
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataSource for TwelveDataSource {
    fn tag(&self) -> SourceTag {
        SourceTag::TwelveData
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn rate_limit_per_minute(&self) -> usize {
        8
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo> {
        let url = format!("{}/profile", self.base_url);
        let upper = symbol.to_uppercase();
        let profile: TdProfile = http::get_json(
            &self.client,
            "twelve_data",
            &url,
            &[("symbol", upper.as_str()), ("apikey", &self.api_key)],
        )
        .await?;

        let name = profile.name.filter(|n| !n.is_empty()).ok_or_else(|| {
            CouncilError::NotFound(format!("twelve_data: unknown symbol {symbol}"))
        })?;

        Ok(StockInfo {
            symbol: symbol.to_string(),
            name,
            market,
            industry: profile.industry,
            currency: profile.currency,
            exchange: profile.exchange,
            list_date: None,
        })
    }

    async fn price_bars(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        let url = format!("{}/time_series", self.base_url);
        let upper = symbol.to_uppercase();
        let start_s = start.format("%Y-%m-%d").to_string();
        let end_s = end.format("%Y-%m-%d").to_string();

        let series: TdTimeSeries = http::get_json(
            &self.client,
            "twelve_data",
            &url,
            &[
                ("symbol", upper.as_str()),
                ("interval", "1day"),
                ("start_date", &start_s),
                ("end_date", &end_s),
                ("apikey", &self.api_key),
            ],
        )
        .await?;

        if series.status.as_deref() == Some("error") {
            Self::check_status(series.code.or(Some(0)), series.message)?;
        }

        let values = series.values.ok_or_else(|| {
            CouncilError::NotFound(format!("twelve_data: no series for {symbol}"))
        })?;

        let mut bars: Vec<PriceBar> = values
            .into_iter()
            .filter_map(|bar| {
                let date = NaiveDate::parse_from_str(&bar.datetime, "%Y-%m-%d").ok()?;
                Some(PriceBar {
                    date,
                    open: bar.open.parse().ok()?,
                    high: bar.high.parse().ok()?,
                    low: bar.low.parse().ok()?,
                    close: bar.close.parse().ok()?,
                    volume: bar
                        .volume
                        .as_deref()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0.0),
                    amount: None,
                })
            })
            .collect();

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "twelve_data: no bars for {symbol} in {start}..{end}"
            )));
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    async fn fundamentals(
        &self,
        _symbol: &str,
        _market: MarketType,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> CouncilResult<Vec<FundamentalReport>> {
        Err(CouncilError::Unavailable(
            "twelve_data: fundamentals requires a plan this deployment does not use".to_string(),
        ))
    }

    async fn news(
        &self,
        _symbol: &str,
        _market: MarketType,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>> {
        Err(CouncilError::Unavailable(
            "twelve_data: news requires a plan this deployment does not use".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        !self.api_key.is_empty()
    }
}
