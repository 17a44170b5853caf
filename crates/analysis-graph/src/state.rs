use chrono::{DateTime, NaiveDate, Utc};
use council_core::{
    AnalysisKind, AnalysisParameters, DataPayload, FundamentalReport, MarketType, NewsItem,
    PriceBar, StockInfo,
};
use serde::{Deserialize, Serialize};

/// One utterance in the debate or risk history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTurn {
    pub speaker: String,
    pub content: String,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
}

/// One entry in the append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Structured risk verdict, parsed once at the agent boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: String,
    pub score: f64,
    pub text: String,
}

/// Structured terminal decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecommendation {
    pub action: String,
    pub confidence: f64,
    #[serde(default)]
    pub target_price: Option<f64>,
    pub reasoning: String,
}

/// The shared working set for one analysis run. Nodes read slices of it
/// and each writes its own report slot; histories and logs only grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    pub symbol: String,
    pub company_name: String,
    pub market: MarketType,
    pub kind: AnalysisKind,
    pub current_date: NaiveDate,
    pub parameters: AnalysisParameters,

    // Input buckets, filled by data collection.
    pub price_data: Option<Vec<PriceBar>>,
    pub financial_data: Option<Vec<FundamentalReport>>,
    pub market_data: Option<StockInfo>,
    pub news_data: Option<Vec<NewsItem>>,
    pub social_data: Option<Vec<NewsItem>>,

    // Report slots, one writer each.
    pub fundamentals_report: Option<String>,
    pub technical_report: Option<String>,
    pub news_report: Option<String>,
    pub sentiment_report: Option<String>,
    pub social_report: Option<String>,
    pub bull_report: Option<String>,
    pub bear_report: Option<String>,
    pub risky_report: Option<String>,
    pub safe_report: Option<String>,
    pub neutral_report: Option<String>,
    pub risk_assessment: Option<RiskAssessment>,
    pub investment_plan: Option<String>,
    pub trade_decision: Option<String>,
    pub final_recommendation: Option<FinalRecommendation>,

    pub messages: Vec<AgentMessage>,
    pub errors: Vec<String>,
    pub completed_steps: Vec<String>,
    pub current_step: String,

    pub debate_history: Vec<DebateTurn>,
    pub risk_history: Vec<DebateTurn>,
    pub debate_summary: Option<String>,
    pub risk_summary: Option<String>,
}

impl AnalysisState {
    pub fn new(
        symbol: &str,
        market: MarketType,
        kind: AnalysisKind,
        current_date: NaiveDate,
        parameters: AnalysisParameters,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            company_name: symbol.to_string(),
            market,
            kind,
            current_date,
            parameters,
            price_data: None,
            financial_data: None,
            market_data: None,
            news_data: None,
            social_data: None,
            fundamentals_report: None,
            technical_report: None,
            news_report: None,
            sentiment_report: None,
            social_report: None,
            bull_report: None,
            bear_report: None,
            risky_report: None,
            safe_report: None,
            neutral_report: None,
            risk_assessment: None,
            investment_plan: None,
            trade_decision: None,
            final_recommendation: None,
            messages: Vec::new(),
            errors: Vec::new(),
            completed_steps: Vec::new(),
            current_step: "initialization".to_string(),
            debate_history: Vec::new(),
            risk_history: Vec::new(),
            debate_summary: None,
            risk_summary: None,
        }
    }

    pub fn push_message(&mut self, role: &str, content: &str) {
        self.messages.push(AgentMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn push_error(&mut self, step: &str, error: &str) {
        self.errors.push(format!("{step}: {error}"));
    }

    pub fn complete_step(&mut self, step: &str) {
        if !self.completed_steps.iter().any(|s| s == step) {
            self.completed_steps.push(step.to_string());
        }
    }

    pub fn apply_data(&mut self, payload: DataPayload) {
        match payload {
            DataPayload::StockInfo(info) => {
                self.company_name = info.name.clone();
                self.market_data = Some(info);
            }
            DataPayload::PriceBars(bars) => self.price_data = Some(bars),
            DataPayload::Fundamentals(reports) => self.financial_data = Some(reports),
            DataPayload::News(items) => self.news_data = Some(items),
        }
    }
}

/// Serialized result of a terminal run: every report slot plus the run's
/// bookkeeping, so callers can show partial insight on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub symbol: String,
    pub company_name: String,
    pub kind: AnalysisKind,
    pub analysis_date: NaiveDate,
    pub reports: ReportSet,
    pub final_recommendation: Option<FinalRecommendation>,
    pub errors: Vec<String>,
    pub completed_steps: Vec<String>,
    pub debate_history: Vec<DebateTurn>,
    pub risk_history: Vec<DebateTurn>,
    pub generated_at: DateTime<Utc>,
}

/// Per-role report strings; `None` marks a slot the run never filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSet {
    pub fundamentals: Option<String>,
    pub technical: Option<String>,
    pub news: Option<String>,
    pub sentiment: Option<String>,
    pub social: Option<String>,
    pub bull: Option<String>,
    pub bear: Option<String>,
    pub risky: Option<String>,
    pub safe: Option<String>,
    pub neutral: Option<String>,
    pub risk_assessment: Option<RiskAssessment>,
    pub investment_plan: Option<String>,
    pub trade_decision: Option<String>,
}

impl AnalysisOutcome {
    pub fn from_state(state: &AnalysisState, success: bool) -> Self {
        Self {
            success,
            symbol: state.symbol.clone(),
            company_name: state.company_name.clone(),
            kind: state.kind,
            analysis_date: state.current_date,
            reports: ReportSet {
                fundamentals: state.fundamentals_report.clone(),
                technical: state.technical_report.clone(),
                news: state.news_report.clone(),
                sentiment: state.sentiment_report.clone(),
                social: state.social_report.clone(),
                bull: state.bull_report.clone(),
                bear: state.bear_report.clone(),
                risky: state.risky_report.clone(),
                safe: state.safe_report.clone(),
                neutral: state.neutral_report.clone(),
                risk_assessment: state.risk_assessment.clone(),
                investment_plan: state.investment_plan.clone(),
                trade_decision: state.trade_decision.clone(),
            },
            final_recommendation: state.final_recommendation.clone(),
            errors: state.errors.clone(),
            completed_steps: state.completed_steps.clone(),
            debate_history: state.debate_history.clone(),
            risk_history: state.risk_history.clone(),
            generated_at: Utc::now(),
        }
    }
}
