use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use council_core::{
    CouncilError, CouncilResult, DataCategory, FundamentalReport, MarketType, NewsItem, PriceBar,
    SourceTag, StockInfo,
};
use reqwest::Client;
use serde::Deserialize;

use crate::http;
use crate::MarketDataSource;

const BASE_URL: &str = "https://finnhub.io/api/v1";

const MARKETS: &[MarketType] = &[MarketType::Us];
const CATEGORIES: &[DataCategory] = &[
    DataCategory::BasicInfo,
    DataCategory::PriceData,
    DataCategory::Fundamentals,
    DataCategory::News,
];

/// Finnhub adapter (US). Free tier allows 60 requests/min.
pub struct FinnhubSource {
    api_key: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FhProfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(rename = "finnhubIndustry", default)]
    industry: Option<String>,
    #[serde(rename = "ipo", default)]
    ipo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FhCandles {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct FhMetrics {
    #[serde(default)]
    metric: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FhNewsItem {
    #[serde(default)]
    headline: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    datetime: i64,
    #[serde(default)]
    source: String,
    #[serde(default)]
    url: Option<String>,
}

impl FinnhubSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http::build_client(Duration::from_secs(30)),
            base_url: BASE_URL.to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
    ) -> CouncilResult<T> {
        query.push(("token", self.api_key.clone()));
        let url = format!("{}{path}", self.base_url);
        let query_ref: Vec<(&str, &str)> =
            query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        http::get_json(&self.client, "finnhub", &url, &query_ref).await
    }
}

#[async_trait]
impl MarketDataSource for FinnhubSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Finnhub
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn rate_limit_per_minute(&self) -> usize {
        60
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo> {
        let profile: FhProfile = self
            .get(
                "/stock/profile2",
                vec![("symbol", symbol.to_uppercase())],
            )
            .await?;

        let name = profile
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CouncilError::NotFound(format!("finnhub: unknown symbol {symbol}")))?;

        Ok(StockInfo {
            symbol: symbol.to_string(),
            name,
            market,
            industry: profile.industry,
            currency: profile.currency,
            exchange: profile.exchange,
            list_date: profile
                .ipo
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        })
    }

    async fn price_bars(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        let from = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let to = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        let candles: FhCandles = self
            .get(
                "/stock/candle",
                vec![
                    ("symbol", symbol.to_uppercase()),
                    ("resolution", "D".to_string()),
                    ("from", from.to_string()),
                    ("to", to.to_string()),
                ],
            )
            .await?;

        if candles.s != "ok" {
            return Err(CouncilError::NotFound(format!(
                "finnhub: no candles for {symbol} in {start}..{end}"
            )));
        }

        let bars: Vec<PriceBar> = candles
            .t
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let date = DateTime::<Utc>::from_timestamp(*ts, 0)?.date_naive();
                Some(PriceBar {
                    date,
                    open: *candles.o.get(i)?,
                    high: *candles.h.get(i)?,
                    low: *candles.l.get(i)?,
                    close: *candles.c.get(i)?,
                    volume: candles.v.get(i).copied().unwrap_or(0.0),
                    amount: None,
                })
            })
            .collect();

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "finnhub: empty candle series for {symbol}"
            )));
        }
        Ok(bars)
    }

    async fn fundamentals(
        &self,
        symbol: &str,
        _market: MarketType,
        _start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<FundamentalReport>> {
        let metrics: FhMetrics = self
            .get(
                "/stock/metric",
                vec![
                    ("symbol", symbol.to_uppercase()),
                    ("metric", "all".to_string()),
                ],
            )
            .await?;

        if metrics.metric.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "finnhub: no metrics for {symbol}"
            )));
        }

        let ratios: HashMap<String, f64> = metrics
            .metric
            .into_iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
            .collect();

        // Finnhub's metric endpoint is a current snapshot, not a series;
        // stamp it with the requested anchor date.
        Ok(vec![FundamentalReport {
            symbol: symbol.to_string(),
            report_date: end,
            ratios,
        }])
    }

    async fn news(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>> {
        let items: Vec<FhNewsItem> = self
            .get(
                "/company-news",
                vec![
                    ("symbol", symbol.to_uppercase()),
                    ("from", start.format("%Y-%m-%d").to_string()),
                    ("to", end.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;

        let news: Vec<NewsItem> = items
            .into_iter()
            .filter(|item| !item.headline.is_empty())
            .filter_map(|item| {
                let publish_time = DateTime::<Utc>::from_timestamp(item.datetime, 0)?;
                Some(NewsItem {
                    title: item.headline,
                    content: item.summary,
                    publish_time,
                    source: if item.source.is_empty() {
                        "finnhub".to_string()
                    } else {
                        item.source
                    },
                    url: item.url,
                    sentiment: None,
                })
            })
            .collect();

        if news.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "finnhub: no news for {symbol} in {start}..{end}"
            )));
        }
        Ok(news)
    }

    async fn health_check(&self) -> bool {
        !self.api_key.is_empty()
    }
}
