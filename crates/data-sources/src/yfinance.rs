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

const BASE_URL: &str = "https://query1.finance.yahoo.com";

const MARKETS: &[MarketType] = &[MarketType::Us, MarketType::Hk];
const CATEGORIES: &[DataCategory] = &[DataCategory::BasicInfo, DataCategory::PriceData];

/// Yahoo Finance chart API adapter. Keyless; used as the broad US/HK
/// fallback near the bottom of most profiles.
pub struct YfinanceSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    currency: Option<String>,
    #[serde(rename = "exchangeName", default)]
    exchange_name: Option<String>,
    #[serde(rename = "longName", default)]
    long_name: Option<String>,
    #[serde(rename = "shortName", default)]
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YfinanceSource {
    pub fn new() -> Self {
        Self {
            client: http::build_client(Duration::from_secs(30)),
            base_url: BASE_URL.to_string(),
        }
    }

    /// HK symbols want the `.HK` suffix Yahoo uses; US tickers pass
    /// through unchanged.
    fn yahoo_symbol(symbol: &str, market: MarketType) -> String {
        match market {
            MarketType::Hk if !symbol.to_uppercase().ends_with(".HK") => {
                // Yahoo wants four digits: 700 -> 0700.HK
                let bare = symbol.split('.').next().unwrap_or(symbol);
                format!("{:0>4}.HK", bare)
            }
            _ => symbol.to_uppercase(),
        }
    }

    async fn chart(
        &self,
        symbol: &str,
        market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<ChartResult> {
        let ysym = Self::yahoo_symbol(symbol, market);
        let url = format!("{}/v8/finance/chart/{ysym}", self.base_url);
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default()
            .to_string();
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default()
            .to_string();

        let envelope: ChartEnvelope = http::get_json(
            &self.client,
            "yfinance",
            &url,
            &[
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
                ("interval", "1d"),
                ("events", "history"),
            ],
        )
        .await?;

        if let Some(err) = envelope.chart.error {
            if !err.is_null() {
                return Err(CouncilError::NotFound(format!("yfinance: {err}")));
            }
        }

        envelope
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| CouncilError::NotFound(format!("yfinance: unknown symbol {symbol}")))
    }
}

impl Default for YfinanceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for YfinanceSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Yfinance
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn rate_limit_per_minute(&self) -> usize {
        // Unofficial API; stay well under Yahoo's unpublished throttle.
        30
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo> {
        let today = Utc::now().date_naive();
        let result = self
            .chart(symbol, market, today - chrono::Duration::days(7), today)
            .await?;

        let name = result
            .meta
            .long_name
            .or(result.meta.short_name)
            .unwrap_or_else(|| symbol.to_string());

        Ok(StockInfo {
            symbol: symbol.to_string(),
            name,
            market,
            industry: None,
            currency: result.meta.currency,
            exchange: result.meta.exchange_name,
            list_date: None,
        })
    }

    async fn price_bars(
        &self,
        symbol: &str,
        market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        let result = self.chart(symbol, market, start, end).await?;

        let timestamps = result.timestamp.unwrap_or_default();
        let quote = result.indicators.quote.into_iter().next().ok_or_else(|| {
            CouncilError::NotFound(format!("yfinance: no quote block for {symbol}"))
        })?;

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            let date = match DateTime::<Utc>::from_timestamp(*ts, 0) {
                Some(dt) => dt.date_naive(),
                None => continue,
            };
            let (open, high, low, close) = match (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                // Yahoo pads holidays with nulls
                _ => continue,
            };
            bars.push(PriceBar {
                date,
                open,
                high,
                low,
                close,
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0.0),
                amount: None,
            });
        }

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "yfinance: no bars for {symbol} in {start}..{end}"
            )));
        }
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
            "yfinance: fundamentals is not provided by this source".to_string(),
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
            "yfinance: news is not provided by this source".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        // Keyless source; nothing to validate without spending a request.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hk_symbols_get_padded_suffix() {
        assert_eq!(
            YfinanceSource::yahoo_symbol("700", MarketType::Hk),
            "0700.HK"
        );
        assert_eq!(
            YfinanceSource::yahoo_symbol("0700.HK", MarketType::Hk),
            "0700.HK"
        );
        assert_eq!(YfinanceSource::yahoo_symbol("aapl", MarketType::Us), "AAPL");
    }
}
