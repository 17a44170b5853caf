use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use council_core::{
    CouncilError, CouncilResult, DataCategory, FundamentalReport, MarketType, NewsItem, PriceBar,
    SourceTag, StockInfo,
};
use reqwest::Client;
use serde::Deserialize;

use crate::http;
use crate::MarketDataSource;

const MARKETS: &[MarketType] = &[MarketType::CnA, MarketType::Hk, MarketType::Us];
const CATEGORIES: &[DataCategory] = &[
    DataCategory::BasicInfo,
    DataCategory::PriceData,
    DataCategory::News,
];

/// AKShare adapter. AKShare itself is a library, not a service; this
/// speaks to an AKTools-style HTTP bridge (`/api/public/{endpoint}`) whose
/// URL comes from `AKSHARE_SERVICE_URL`.
pub struct AkshareSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AkInfoRow {
    item: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AkDailyRow {
    #[serde(rename = "日期")]
    date: String,
    #[serde(rename = "开盘")]
    open: f64,
    #[serde(rename = "最高")]
    high: f64,
    #[serde(rename = "最低")]
    low: f64,
    #[serde(rename = "收盘")]
    close: f64,
    #[serde(rename = "成交量")]
    volume: f64,
    #[serde(rename = "成交额", default)]
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AkNewsRow {
    #[serde(rename = "新闻标题")]
    title: String,
    #[serde(rename = "新闻内容", default)]
    content: String,
    #[serde(rename = "发布时间")]
    publish_time: String,
    #[serde(rename = "文章来源", default)]
    source: String,
    #[serde(rename = "新闻链接", default)]
    url: Option<String>,
}

impl AkshareSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: http::build_client(Duration::from_secs(60)),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/public/{name}", self.base_url)
    }

    /// AKShare A-share endpoints want the bare six-digit code.
    fn bare_symbol(symbol: &str) -> &str {
        symbol.split('.').next().unwrap_or(symbol)
    }
}

#[async_trait]
impl MarketDataSource for AkshareSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Akshare
    }

    fn supported_markets(&self) -> &[MarketType] {
        MARKETS
    }

    fn supported_categories(&self) -> &[DataCategory] {
        CATEGORIES
    }

    fn timeout(&self) -> Duration {
        // The bridge fans out to slow upstream pages.
        Duration::from_secs(60)
    }

    fn rate_limit_per_minute(&self) -> usize {
        60
    }

    async fn stock_info(&self, symbol: &str, market: MarketType) -> CouncilResult<StockInfo> {
        let endpoint = match market {
            MarketType::CnA => self.endpoint("stock_individual_info_em"),
            MarketType::Hk => self.endpoint("stock_hk_company_profile_em"),
            MarketType::Us => self.endpoint("stock_us_fundamental"),
        };
        let bare = Self::bare_symbol(symbol);

        let rows: Vec<AkInfoRow> =
            http::get_json(&self.client, "akshare", &endpoint, &[("symbol", bare)]).await?;

        if rows.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "akshare: unknown symbol {symbol}"
            )));
        }

        let mut info = StockInfo {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            market,
            industry: None,
            currency: Some(
                match market {
                    MarketType::CnA => "CNY",
                    MarketType::Hk => "HKD",
                    MarketType::Us => "USD",
                }
                .to_string(),
            ),
            exchange: None,
            list_date: None,
        };

        for row in rows {
            let text = row
                .value
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| row.value.to_string());
            match row.item.as_str() {
                "股票简称" | "name" => info.name = text,
                "行业" | "industry" => info.industry = Some(text),
                "上市时间" | "list_date" => {
                    info.list_date = NaiveDate::parse_from_str(&text, "%Y%m%d")
                        .or_else(|_| NaiveDate::parse_from_str(&text, "%Y-%m-%d"))
                        .ok();
                }
                _ => {}
            }
        }

        Ok(info)
    }

    async fn price_bars(
        &self,
        symbol: &str,
        market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<PriceBar>> {
        let endpoint = match market {
            MarketType::CnA => self.endpoint("stock_zh_a_hist"),
            MarketType::Hk => self.endpoint("stock_hk_hist"),
            MarketType::Us => self.endpoint("stock_us_hist"),
        };
        let bare = Self::bare_symbol(symbol);
        let start_s = start.format("%Y%m%d").to_string();
        let end_s = end.format("%Y%m%d").to_string();

        let rows: Vec<AkDailyRow> = http::get_json(
            &self.client,
            "akshare",
            &endpoint,
            &[
                ("symbol", bare),
                ("period", "daily"),
                ("start_date", &start_s),
                ("end_date", &end_s),
                ("adjust", "qfq"),
            ],
        )
        .await?;

        let mut bars: Vec<PriceBar> = rows
            .into_iter()
            .filter_map(|row| {
                let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").ok()?;
                Some(PriceBar {
                    date,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                    amount: row.amount,
                })
            })
            .collect();

        if bars.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "akshare: no bars for {symbol} in {start}..{end}"
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
            "akshare: fundamentals is not provided by this source".to_string(),
        ))
    }

    async fn news(
        &self,
        symbol: &str,
        _market: MarketType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<Vec<NewsItem>> {
        let endpoint = self.endpoint("stock_news_em");
        let bare = Self::bare_symbol(symbol);

        let rows: Vec<AkNewsRow> =
            http::get_json(&self.client, "akshare", &endpoint, &[("symbol", bare)]).await?;

        let items: Vec<NewsItem> = rows
            .into_iter()
            .filter_map(|row| {
                let naive =
                    NaiveDateTime::parse_from_str(&row.publish_time, "%Y-%m-%d %H:%M:%S").ok()?;
                let publish_time = Utc.from_utc_datetime(&naive);
                let d = publish_time.date_naive();
                if d < start || d > end {
                    return None;
                }
                Some(NewsItem {
                    title: row.title,
                    content: row.content,
                    publish_time,
                    source: if row.source.is_empty() {
                        "akshare".to_string()
                    } else {
                        row.source
                    },
                    url: row.url,
                    sentiment: None,
                })
            })
            .collect();

        if items.is_empty() {
            return Err(CouncilError::NotFound(format!(
                "akshare: no news for {symbol} in {start}..{end}"
            )));
        }
        Ok(items)
    }

    async fn health_check(&self) -> bool {
        // The bridge is local infrastructure; probing its root is cheap.
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
    fn bare_symbol_strips_exchange_suffix() {
        assert_eq!(AkshareSource::bare_symbol("000858.SZ"), "000858");
        assert_eq!(AkshareSource::bare_symbol("000858"), "000858");
    }

    #[test]
    fn endpoint_join_handles_trailing_slash() {
        let source = AkshareSource::new("http://localhost:8080/".to_string());
        assert_eq!(
            source.endpoint("stock_zh_a_hist"),
            "http://localhost:8080/api/public/stock_zh_a_hist"
        );
    }
}
