use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CouncilError;

/// Market a symbol trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    CnA,
    Hk,
    Us,
}

impl MarketType {
    /// Key segment used in priority-profile lookups ("{market}_{category}").
    pub fn as_key(&self) -> &'static str {
        match self {
            MarketType::CnA => "cn_a",
            MarketType::Hk => "hk",
            MarketType::Us => "us",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cn_a" | "cn-a" | "a_share" => Some(MarketType::CnA),
            "hk" | "hk_stock" => Some(MarketType::Hk),
            "us" | "us_stock" => Some(MarketType::Us),
            _ => None,
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Category of market data; controls cache TTL and source priority lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    BasicInfo,
    PriceData,
    Fundamentals,
    News,
    Technical,
}

impl DataCategory {
    pub fn as_key(&self) -> &'static str {
        match self {
            DataCategory::BasicInfo => "basic_info",
            DataCategory::PriceData => "price_data",
            DataCategory::Fundamentals => "fundamentals",
            DataCategory::News => "news",
            DataCategory::Technical => "technical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic_info" => Some(DataCategory::BasicInfo),
            "price_data" => Some(DataCategory::PriceData),
            "fundamentals" => Some(DataCategory::Fundamentals),
            "news" => Some(DataCategory::News),
            "technical" => Some(DataCategory::Technical),
            _ => None,
        }
    }

    pub fn all() -> [DataCategory; 5] {
        [
            DataCategory::BasicInfo,
            DataCategory::PriceData,
            DataCategory::Fundamentals,
            DataCategory::News,
            DataCategory::Technical,
        ]
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Identity of an external market-data provider. The adapter registry is
/// compile-time: unknown tags in profile files are skipped with a warning,
/// never loaded dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Tushare,
    Akshare,
    Baostock,
    Yfinance,
    Finnhub,
    AlphaVantage,
    TwelveData,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Tushare => "tushare",
            SourceTag::Akshare => "akshare",
            SourceTag::Baostock => "baostock",
            SourceTag::Yfinance => "yfinance",
            SourceTag::Finnhub => "finnhub",
            SourceTag::AlphaVantage => "alpha_vantage",
            SourceTag::TwelveData => "twelve_data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tushare" => Some(SourceTag::Tushare),
            "akshare" => Some(SourceTag::Akshare),
            "baostock" => Some(SourceTag::Baostock),
            "yfinance" => Some(SourceTag::Yfinance),
            "finnhub" => Some(SourceTag::Finnhub),
            "alpha_vantage" => Some(SourceTag::AlphaVantage),
            "twelve_data" => Some(SourceTag::TwelveData),
            _ => None,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which agent pipeline an analysis request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Fundamentals,
    Technical,
    News,
    Comprehensive,
    Debate,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Fundamentals => "fundamentals",
            AnalysisKind::Technical => "technical",
            AnalysisKind::News => "news",
            AnalysisKind::Comprehensive => "comprehensive",
            AnalysisKind::Debate => "debate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fundamentals" => Some(AnalysisKind::Fundamentals),
            "technical" => Some(AnalysisKind::Technical),
            "news" => Some(AnalysisKind::News),
            "comprehensive" => Some(AnalysisKind::Comprehensive),
            "debate" => Some(AnalysisKind::Debate),
            _ => None,
        }
    }
}

/// Task priority, ordered LOW < NORMAL < HIGH < URGENT.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

/// Scheduler task lifecycle. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// Legal lifecycle edges: PENDING -> {RUNNING, CANCELLED};
    /// RUNNING -> {COMPLETED, FAILED, TIMEOUT, CANCELLED, PENDING (retry)}.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(next, TaskStatus::Running | TaskStatus::Cancelled),
            TaskStatus::Running => matches!(
                next,
                TaskStatus::Completed
                    | TaskStatus::Failed
                    | TaskStatus::Timeout
                    | TaskStatus::Cancelled
                    | TaskStatus::Pending
            ),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            "timeout" => Some(TaskStatus::Timeout),
            _ => None,
        }
    }
}

/// Normalized company profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StockInfo {
    pub symbol: String,
    pub name: String,
    pub market: MarketType,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub list_date: Option<NaiveDate>,
}

/// Normalized daily OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Turnover in the quote currency, where the provider reports it.
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Normalized fundamentals snapshot for one reporting period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FundamentalReport {
    pub symbol: String,
    pub report_date: NaiveDate,
    pub ratios: HashMap<String, f64>,
}

/// Normalized news article.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewsItem {
    pub title: String,
    pub content: String,
    pub publish_time: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sentiment: Option<f64>,
}

/// Category-dependent record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataPayload {
    StockInfo(StockInfo),
    PriceBars(Vec<PriceBar>),
    Fundamentals(Vec<FundamentalReport>),
    News(Vec<NewsItem>),
}

/// A fetched record set, stamped with its origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DataRecord {
    pub source: SourceTag,
    pub market: MarketType,
    pub category: DataCategory,
    pub fetched_at: DateTime<Utc>,
    pub payload: DataPayload,
}

/// Tunable knobs for one analysis run. Unknown options are rejected at the
/// API boundary; this struct is the closed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct AnalysisParameters {
    pub enable_fundamentals: bool,
    pub enable_technical: bool,
    pub enable_news: bool,
    pub enable_sentiment: bool,
    pub enable_social: bool,
    /// Explicit caller choice; when absent the default depends on the
    /// analysis kind (on for comprehensive and debate runs).
    pub enable_debate: Option<bool>,
    pub enable_risk_assessment: bool,
    pub max_debate_rounds: u32,
    pub max_risk_rounds: u32,
    pub model_name: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub lookback_days: i64,
}

impl AnalysisParameters {
    /// Resolve the debate switch for a run: an explicit caller value
    /// wins, otherwise comprehensive and debate kinds debate by default.
    pub fn debate_enabled(&self, kind: AnalysisKind) -> bool {
        self.enable_debate.unwrap_or(matches!(
            kind,
            AnalysisKind::Comprehensive | AnalysisKind::Debate
        ))
    }
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            enable_fundamentals: true,
            enable_technical: true,
            enable_news: true,
            enable_sentiment: true,
            enable_social: false,
            enable_debate: None,
            enable_risk_assessment: true,
            max_debate_rounds: 3,
            max_risk_rounds: 2,
            model_name: None,
            temperature: 0.1,
            max_tokens: 1500,
            lookback_days: 30,
        }
    }
}

/// A request to analyze one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AnalysisRequest {
    pub symbol: String,
    pub market: MarketType,
    /// Trading date the analysis is anchored to, YYYY-MM-DD.
    pub analysis_date: NaiveDate,
    pub kind: AnalysisKind,
    #[serde(default)]
    pub parameters: AnalysisParameters,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl AnalysisRequest {
    /// Structural validation applied before a task is accepted.
    pub fn validate(&self) -> Result<(), CouncilError> {
        if self.symbol.is_empty() || self.symbol.len() > 16 {
            return Err(CouncilError::Validation(format!(
                "invalid symbol: {:?}",
                self.symbol
            )));
        }
        if !self
            .symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(CouncilError::Validation(format!(
                "symbol contains invalid characters: {:?}",
                self.symbol
            )));
        }
        if self.parameters.max_debate_rounds == 0 || self.parameters.max_debate_rounds > 10 {
            return Err(CouncilError::Validation(
                "max_debate_rounds must be in 1..=10".to_string(),
            ));
        }
        if self.parameters.max_risk_rounds == 0 || self.parameters.max_risk_rounds > 10 {
            return Err(CouncilError::Validation(
                "max_risk_rounds must be in 1..=10".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.parameters.temperature) {
            return Err(CouncilError::Validation(
                "temperature must be in 0.0..=2.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(symbol: &str) -> AnalysisRequest {
        AnalysisRequest {
            symbol: symbol.to_string(),
            market: MarketType::Us,
            analysis_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            kind: AnalysisKind::Comprehensive,
            parameters: AnalysisParameters::default(),
            priority: TaskPriority::Normal,
            timeout_seconds: None,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn priority_ordering_matches_dispatch_order() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Timeout,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Completed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn validate_rejects_bad_symbols() {
        assert!(request("AAPL").validate().is_ok());
        assert!(request("000858").validate().is_ok());
        assert!(request("0700.HK").validate().is_ok());
        assert!(request("").validate().is_err());
        assert!(request("AAPL; DROP").validate().is_err());
    }

    #[test]
    fn debate_defaults_follow_the_analysis_kind() {
        let parameters = AnalysisParameters::default();
        assert!(parameters.debate_enabled(AnalysisKind::Comprehensive));
        assert!(parameters.debate_enabled(AnalysisKind::Debate));
        assert!(!parameters.debate_enabled(AnalysisKind::Fundamentals));
        assert!(!parameters.debate_enabled(AnalysisKind::Technical));
        assert!(!parameters.debate_enabled(AnalysisKind::News));

        // An explicit caller value always wins over the kind default.
        let mut parameters = AnalysisParameters::default();
        parameters.enable_debate = Some(false);
        assert!(!parameters.debate_enabled(AnalysisKind::Comprehensive));
        parameters.enable_debate = Some(true);
        assert!(parameters.debate_enabled(AnalysisKind::Technical));
    }

    #[test]
    fn profile_key_segments() {
        assert_eq!(MarketType::CnA.as_key(), "cn_a");
        assert_eq!(DataCategory::PriceData.as_key(), "price_data");
        assert_eq!(
            format!("{}_{}", MarketType::Us, DataCategory::News),
            "us_news"
        );
    }
}
