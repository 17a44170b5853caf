use std::collections::HashMap;
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

const BASE_URL: &str = "https://www.alphavantage.co/query";

const MARKETS: &[MarketType] = &[MarketType::Us];
const CATEGORIES: &[DataCategory] = &[
    DataCategory::BasicInfo,
    DataCategory::PriceData,
    DataCategory::Fundamentals,
];

/// Alpha Vantage adapter (US). The free tier is 5 requests/min, which is
/// why it sits at the top of US profiles only when a paid key is set.
pub struct AlphaVantageSource {
    api_key: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AvDaily {
    #[serde(rename = "Time Series (Daily)", default)]
    series: Option<HashMap<String, AvBar>>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

impl AlphaVantageSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http::build_client(Duration::from_secs(30)),
            base_url: BASE_URL.to_string(),
        }
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        symbol: &str,
        extra: &[(&str, &str)],
    ) -> CouncilResult<T> {
        let mut query: Vec<(&str, &str)> = vec![
            ("function", function),
            ("symbol", symbol),
            ("apikey", &self.api_key),
        ];
        query.extend_from_slice(extra);
        http::get_json(&self.client, "alpha_vantage", &self.base_url, &query).await
    }

    fn num(s: &str) -> Option<f64> {
        s.trim().parse().ok()
    }
}

#[async_trait]
impl MarketDataSource for AlphaVantageSource {
    fn tag(&self) -> SourceTag {
        SourceTag::AlphaVantage
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn rate_limit_per_minute(&self) -> usize {
        5
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo> {
        let overview: HashMap<String, serde_json::Value> =
            self.query("OVERVIEW", &symbol.to_uppercase(), &[]).await?;

        let name = overview
            .get("Name")
            .and_then(|v| v.as_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                CouncilError::NotFound(format!("alpha_vantage: unknown symbol {symbol}"))
            })?
            .to_string();

        let text = |key: &str| {
            overview
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty() && *s != "None")
                .map(|s| s.to_string())
        };

        Ok(StockInfo {
            symbol: symbol.to_string(),
            name,
            market,
            industry: text("Industry"),
            currency: text("Currency"),
            exchange: text("Exchange"),
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
        let daily: AvDaily = self
            .query(
                "TIME_SERIES_DAILY",
                &symbol.to_uppercase(),
                &[("outputsize", "full")],
            )
            .await?;

        if let Some(note) = daily.note {
            // The free tier returns 200 with a "Note" when throttled.
            return Err(CouncilError::RateLimited(format!("alpha_vantage: {note}")));
        }
        if let Some(msg) = daily.error_message {
            return Err(CouncilError::NotFound(format!("alpha_vantage: {msg}")));
        }

        let series = daily.series.ok_or_else(|| {
            CouncilError::NotFound(format!("alpha_vantage: no series for {symbol}"))
        })?;

        let mut bars: Vec<PriceBar> = series
            .into_iter()
            .filter_map(|(date_s, bar)| {
                let date = NaiveDate::parse_from_str(&date_s, "%Y-%m-%d").ok()?;
                if date < start || date > end {
                    return None;
                }
                Some(PriceBar {
                    date,
                    open: Self::num(&bar.open)?,
                    high: Self::num(&bar.high)?,
                    low: Self::num(&bar.low)?,
                    close: Self::num(&bar.close)?,
                    volume: Self::num(&bar.volume).unwrap_or(0.0),
                    amount: None,
                })
            })
            .collect();

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "alpha_vantage: no bars for {symbol} in {start}..{end}"
            )));
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    async fn fundamentals(
        &self,
        symbol: &str,
        _market: MarketType,
        _start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<FundamentalReport>> {
        let overview: HashMap<String, serde_json::Value> =
            self.query("OVERVIEW", &symbol.to_uppercase(), &[]).await?;

        if overview.get("Symbol").is_none() {
            return Err(CouncilError::NotFound(format!(
                "alpha_vantage: no fundamentals for {symbol}"
            )));
        }

        let mut ratios = HashMap::new();
        for key in [
            "PERatio",
            "PEGRatio",
            "PriceToBookRatio",
            "EPS",
            "ProfitMargin",
            "OperatingMarginTTM",
            "ReturnOnEquityTTM",
            "ReturnOnAssetsTTM",
            "RevenueTTM",
            "GrossProfitTTM",
            "DividendYield",
            "Beta",
        ] {
            if let Some(v) = overview
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
            {
                ratios.insert(key.to_string(), v);
            }
        }

        Ok(vec![FundamentalReport {
            symbol: symbol.to_string(),
            report_date: end,
            ratios,
        }])
    }

    async fn news(
        &self,
        _symbol: &str,
        _market: MarketType,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>> {
        Err(CouncilError::Unavailable(
            "alpha_vantage: news is not provided by this source".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        !self.api_key.is_empty()
    }
}
