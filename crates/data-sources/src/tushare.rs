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
use serde_json::json;

use crate::http;
use crate::MarketDataSource;

const BASE_URL: &str = "https://api.tushare.pro";

const MARKETS: &[MarketType] = &[MarketType::CnA];
const CATEGORIES: &[DataCategory] = &[
    DataCategory::BasicInfo,
    DataCategory::PriceData,
    DataCategory::Fundamentals,
];

/// Tushare Pro adapter (CN A-share). The API is a single POST endpoint
/// dispatched by `api_name`, returning columnar `{fields, items}` frames.
pub struct TushareSource {
    token: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<TushareFrame>,
}

#[derive(Debug, Deserialize)]
struct TushareFrame {
    fields: Vec<String>,
    items: Vec<Vec<serde_json::Value>>,
}

impl TushareFrame {
    /// Rows as field->value maps; columnar frames are awkward to consume
    /// directly.
    fn rows(&self) -> Vec<HashMap<&str, &serde_json::Value>> {
        self.items
            .iter()
            .map(|item| {
                self.fields
                    .iter()
                    .map(String::as_str)
                    .zip(item.iter())
                    .collect()
            })
            .collect()
    }
}

fn field_str(row: &HashMap<&str, &serde_json::Value>, key: &str) -> Option<String> {
    row.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn field_f64(row: &HashMap<&str, &serde_json::Value>, key: &str) -> Option<f64> {
    row.get(key).and_then(|v| v.as_f64())
}

/// "20240102" (tushare) -> NaiveDate.
fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

impl TushareSource {
    pub fn new(token: String) -> Self {
        Self {
            token,
            client: http::build_client(Duration::from_secs(30)),
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self {
            token,
            client: http::build_client(Duration::from_secs(5)),
            base_url,
        }
    }

    /// Exchange-suffixed code tushare expects: 600519 -> 600519.SH,
    /// 000858 -> 000858.SZ.
    fn ts_code(symbol: &str) -> String {
        if symbol.contains('.') {
            return symbol.to_uppercase();
        }
        if symbol.starts_with('6') {
            format!("{symbol}.SH")
        } else if symbol.starts_with('4') || symbol.starts_with('8') {
            format!("{symbol}.BJ")
        } else {
            format!("{symbol}.SZ")
        }
    }

    async fn call(
        &self,
        api_name: &str,
        params: serde_json::Value,
        fields: &str,
    ) -> CouncilResult<TushareFrame> {
        let body = json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": fields,
        });

        let response: TushareResponse =
            http::post_json(&self.client, "tushare", &self.base_url, &body).await?;

        if response.code != 0 {
            let msg = response.msg.unwrap_or_else(|| "unknown error".to_string());
            // Tushare signals throttling and bad tokens in-band with code 0/-1
            // plus a message; classify on the message keywords.
            return Err(if msg.contains("limit") || msg.contains("frequent") {
                CouncilError::RateLimited(format!("tushare: {msg}"))
            } else if msg.contains("token") {
                CouncilError::Auth(format!("tushare: {msg}"))
            } else {
                CouncilError::Unavailable(format!("tushare: {msg}"))
            });
        }

        response
            .data
            .ok_or_else(|| CouncilError::Unavailable("tushare: empty data frame".to_string()))
    }
}

#[async_trait]
impl MarketDataSource for TushareSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Tushare
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn rate_limit_per_minute(&self) -> usize {
        500
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo> {
        let frame = self
            .call(
                "stock_basic",
                json!({ "ts_code": Self::ts_code(symbol) }),
                "ts_code,symbol,name,area,industry,market,list_date",
            )
            .await?;

        let rows = frame.rows();
        let row = rows
            .first()
            .ok_or_else(|| CouncilError::NotFound(format!("tushare: unknown symbol {symbol}")))?;

        Ok(StockInfo {
            symbol: symbol.to_string(),
            name: field_str(row, "name").unwrap_or_else(|| symbol.to_string()),
            market,
            industry: field_str(row, "industry"),
            currency: Some("CNY".to_string()),
            exchange: field_str(row, "market"),
            list_date: field_str(row, "list_date").and_then(|d| parse_compact_date(&d)),
        })
    }

    async fn price_bars(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        let frame = self
            .call(
                "daily",
                json!({
                    "ts_code": Self::ts_code(symbol),
                    "start_date": start.format("%Y%m%d").to_string(),
                    "end_date": end.format("%Y%m%d").to_string(),
                }),
                "ts_code,trade_date,open,high,low,close,vol,amount",
            )
            .await?;

        let mut bars: Vec<PriceBar> = frame
            .rows()
            .iter()
            .filter_map(|row| {
                let date = field_str(row, "trade_date").and_then(|d| parse_compact_date(&d))?;
                Some(PriceBar {
                    date,
                    open: field_f64(row, "open")?,
                    high: field_f64(row, "high")?,
                    low: field_f64(row, "low")?,
                    close: field_f64(row, "close")?,
                    // vol is in lots of 100 shares, amount in thousands of CNY
                    volume: field_f64(row, "vol").unwrap_or(0.0) * 100.0,
                    amount: field_f64(row, "amount").map(|a| a * 1000.0),
                })
            })
            .collect();

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "tushare: no bars for {symbol} in {start}..{end}"
            )));
        }

        // Tushare returns newest-first
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
        let frame = self
            .call(
                "fina_indicator",
                json!({
                    "ts_code": Self::ts_code(symbol),
                    "start_date": start.format("%Y%m%d").to_string(),
                    "end_date": end.format("%Y%m%d").to_string(),
                }),
                "ts_code,end_date,eps,roe,roa,grossprofit_margin,netprofit_margin,debt_to_assets,current_ratio,quick_ratio,bps",
            )
            .await?;

        let reports: Vec<FundamentalReport> = frame
            .rows()
            .iter()
            .filter_map(|row| {
                let report_date = field_str(row, "end_date").and_then(|d| parse_compact_date(&d))?;
                let mut ratios = HashMap::new();
                for key in [
                    "eps",
                    "roe",
                    "roa",
                    "grossprofit_margin",
                    "netprofit_margin",
                    "debt_to_assets",
                    "current_ratio",
                    "quick_ratio",
                    "bps",
                ] {
                    if let Some(v) = field_f64(row, key) {
                        ratios.insert(key.to_string(), v);
                    }
                }
                Some(FundamentalReport {
                    symbol: symbol.to_string(),
                    report_date,
                    ratios,
                })
            })
            .collect();

        if reports.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "tushare: no fundamentals for {symbol}"
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
            "tushare: news is not provided by this source".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        // Config-only probe: a token is the sole prerequisite. Hitting the
        // API here would burn metered quota every 30 s.
        !self.token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_code_applies_exchange_suffix() {
        assert_eq!(TushareSource::ts_code("600519"), "600519.SH");
        assert_eq!(TushareSource::ts_code("000858"), "000858.SZ");
        assert_eq!(TushareSource::ts_code("830799"), "830799.BJ");
        assert_eq!(TushareSource::ts_code("000858.sz"), "000858.SZ");
    }

    #[test]
    fn columnar_frame_to_rows() {
        let frame = TushareFrame {
            fields: vec!["trade_date".into(), "close".into()],
            items: vec![vec![json!("20240102"), json!(13.5)]],
        };
        let rows = frame.rows();
        assert_eq!(field_str(&rows[0], "trade_date").unwrap(), "20240102");
        assert_eq!(field_f64(&rows[0], "close").unwrap(), 13.5);
    }
}
