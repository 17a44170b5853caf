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

const MARKETS: &[MarketType] = &[MarketType::CnA];
const CATEGORIES: &[DataCategory] = &[DataCategory::PriceData, DataCategory::Fundamentals];

/// Baostock adapter (CN A-share history + quarterly indicators), reached
/// through an HTTP bridge configured by `BAOSTOCK_SERVICE_URL`. Free and
/// keyless, which makes it the usual last CN fallback.
pub struct BaostockSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BsKLineRow {
    date: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    #[serde(default)]
    amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BsProfitRow {
    #[serde(rename = "statDate")]
    stat_date: String,
    #[serde(flatten)]
    fields: HashMap<String, serde_json::Value>,
}

impl BaostockSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: http::build_client(Duration::from_secs(30)),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Baostock codes carry a lowercase exchange prefix: sh.600519.
    fn bs_code(symbol: &str) -> String {
        if symbol.contains('.') && !symbol.chars().next().unwrap_or('0').is_ascii_digit() {
            return symbol.to_lowercase();
        }
        let bare = symbol.split('.').next().unwrap_or(symbol);
        if bare.starts_with('6') {
            format!("sh.{bare}")
        } else {
            format!("sz.{bare}")
        }
    }

    fn parse_num(s: &str) -> Option<f64> {
        s.trim().parse::<f64>().ok()
    }
}

#[async_trait]
impl MarketDataSource for BaostockSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Baostock
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn rate_limit_per_minute(&self) -> usize {
        30
    }

    async fn stock_info(&self, _symbol: &str, _market: MarketType) -> CouncilResult<StockInfo> {
        Err(CouncilError::Unavailable(
            "baostock: basic_info is not provided by this source".to_string(),
        ))
    }

    async fn price_bars(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        let url = format!("{}/query/history_k_data", self.base_url);
        let code = Self::bs_code(symbol);
        let start_s = start.format("%Y-%m-%d").to_string();
        let end_s = end.format("%Y-%m-%d").to_string();

        let rows: Vec<BsKLineRow> = http::get_json(
            &self.client,
            "baostock",
            &url,
            &[
                ("code", code.as_str()),
                ("fields", "date,open,high,low,close,volume,amount"),
                ("start_date", &start_s),
                ("end_date", &end_s),
                ("frequency", "d"),
                ("adjustflag", "2"),
            ],
        )
        .await?;

        let mut bars: Vec<PriceBar> = rows
            .into_iter()
            .filter_map(|row| {
                Some(PriceBar {
                    date: NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").ok()?,
                    open: Self::parse_num(&row.open)?,
                    high: Self::parse_num(&row.high)?,
                    low: Self::parse_num(&row.low)?,
                    close: Self::parse_num(&row.close)?,
                    volume: Self::parse_num(&row.volume).unwrap_or(0.0),
                    amount: row.amount.as_deref().and_then(Self::parse_num),
                })
            })
            .collect();

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "baostock: no bars for {symbol} in {start}..{end}"
            )));
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    async fn fundamentals(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<FundamentalReport>> {
        let url = format!("{}/query/profit_data", self.base_url);
        let code = Self::bs_code(symbol);
        let year = end.format("%Y").to_string();

        let rows: Vec<BsProfitRow> = http::get_json(
            &self.client,
            "baostock",
            &url,
            &[("code", code.as_str()), ("year", &year)],
        )
        .await?;

        let reports: Vec<FundamentalReport> = rows
            .into_iter()
            .filter_map(|row| {
                let report_date = NaiveDate::parse_from_str(&row.stat_date, "%Y-%m-%d").ok()?;
                if report_date < start || report_date > end {
                    return None;
                }
                let ratios = row
                    .fields
                    .iter()
                    .filter_map(|(k, v)| {
                        let value = v
                            .as_f64()
                            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))?;
                        Some((k.clone(), value))
                    })
                    .collect();
                Some(FundamentalReport {
                    symbol: symbol.to_string(),
                    report_date,
                    ratios,
                })
            })
            .collect();

        if reports.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "baostock: no fundamentals for {symbol}"
            )));
        }
        Ok(reports)
    }

    async fn news(
        &self,
        _symbol: &str,
        _market: MarketType,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>> {
        Err(CouncilError::Unavailable(
            "baostock: news is not provided by this source".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| !r.status().is_server_error())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bs_code_prefixes_exchange() {
        assert_eq!(BaostockSource::bs_code("600519"), "sh.600519");
        assert_eq!(BaostockSource::bs_code("000858"), "sz.000858");
        assert_eq!(BaostockSource::bs_code("SH.600519"), "sh.600519");
    }
}
