mod engine;
mod invoker;
mod nodes;
mod state;

pub use engine::{AnalysisGraph, MarketDataProvider};
pub use invoker::{
    parse_final_recommendation, parse_risk_assessment, AgentInvoker, CompletionProvider,
};
pub use nodes::{
    lookup_edge, transitions, ConsensusCheck, DebateRotation, DebateSpeaker, Edge, GraphNode,
    NeverConsensus, RiskRotation, RiskSpeaker,
};
pub use state::{
    AgentMessage, AnalysisOutcome, AnalysisState, DebateTurn, FinalRecommendation, ReportSet,
    RiskAssessment,
};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use council_core::{
        AnalysisKind, AnalysisParameters, AnalysisRequest, CouncilError, CouncilResult,
        DataCategory, DataPayload, MarketType, PriceBar, StockInfo, TaskPriority,
    };
    use llm_router::{ChatCompletion, CompletionRequest, TokenUsage};
    use memory_client::MemoryClient;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Stub LLM: answers structured JSON for the structured roles and a
    /// role-tagged sentence otherwise.
    struct StubLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionProvider for StubLlm {
        async fn complete(&self, request: &CompletionRequest) -> CouncilResult<ChatCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let system = &request.messages[0].content;
            let content = if system.contains("risk manager") {
                r#"{"level": "medium", "score": 55, "text": "position size warrants care"}"#
                    .to_string()
            } else if system.contains("final recommendation") {
                r#"{"action": "buy", "confidence": 0.72, "target_price": 125.0, "reasoning": "fundamentals and momentum agree"}"#
                    .to_string()
            } else {
                format!("[{}] analysis output", request.task_type)
            };
            Ok(ChatCompletion {
                content,
                usage: TokenUsage {
                    prompt_tokens: 50,
                    completion_tokens: 20,
                    total_tokens: 70,
                },
                model: "stub-model".to_string(),
                provider: "stub".to_string(),
            })
        }
    }

    /// Stub data provider; `missing` categories return NotFound.
    struct StubData {
        missing: Vec<DataCategory>,
    }

    #[async_trait]
    impl MarketDataProvider for StubData {
        async fn fetch(
            &self,
            symbol: &str,
            market: MarketType,
            category: DataCategory,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> CouncilResult<DataPayload> {
            if self.missing.contains(&category) {
                return Err(CouncilError::NotFound(format!("no {category} for {symbol}")));
            }
            Ok(match category {
                DataCategory::BasicInfo => DataPayload::StockInfo(StockInfo {
                    symbol: symbol.to_string(),
                    name: format!("{symbol} Inc"),
                    market,
                    industry: Some("Technology".to_string()),
                    currency: Some("USD".to_string()),
                    exchange: None,
                    list_date: None,
                }),
                DataCategory::PriceData | DataCategory::Technical => {
                    DataPayload::PriceBars(vec![PriceBar {
                        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                        open: 100.0,
                        high: 102.0,
                        low: 99.0,
                        close: 101.5,
                        volume: 1_000_000.0,
                        amount: None,
                    }])
                }
                DataCategory::Fundamentals => DataPayload::Fundamentals(vec![]),
                DataCategory::News => DataPayload::News(vec![]),
            })
        }
    }

    fn graph(missing: Vec<DataCategory>) -> AnalysisGraph {
        let llm = Arc::new(StubLlm {
            calls: AtomicU32::new(0),
        });
        let invoker = AgentInvoker::new(llm, Arc::new(MemoryClient::new(None)));
        AnalysisGraph::new(invoker, Arc::new(StubData { missing }))
    }

    fn request(kind: AnalysisKind, parameters: AnalysisParameters) -> AnalysisRequest {
        AnalysisRequest {
            symbol: "AAPL".to_string(),
            market: MarketType::Us,
            analysis_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            kind,
            parameters,
            priority: TaskPriority::Normal,
            timeout_seconds: None,
            dependencies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fundamentals_kind_produces_report_and_recommendation() {
        let outcome = graph(vec![])
            .run(&request(
                AnalysisKind::Fundamentals,
                AnalysisParameters::default(),
            ))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.reports.fundamentals.is_some());
        assert!(outcome.reports.risk_assessment.is_some());
        assert!(outcome.final_recommendation.is_some());
        assert!(outcome.errors.is_empty());
        assert!(outcome
            .completed_steps
            .iter()
            .any(|s| s == "report_generator"));
    }

    #[tokio::test]
    async fn missing_primary_data_is_terminal_for_fundamentals() {
        let err = graph(vec![DataCategory::Fundamentals])
            .run(&request(
                AnalysisKind::Fundamentals,
                AnalysisParameters::default(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CouncilError::Unavailable(_)));
    }

    #[tokio::test]
    async fn missing_news_degrades_comprehensive_instead_of_failing() {
        let mut parameters = AnalysisParameters::default();
        parameters.enable_risk_assessment = false;
        let outcome = graph(vec![DataCategory::News])
            .run(&request(AnalysisKind::Comprehensive, parameters))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(!outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn comprehensive_debate_bounds_and_rotation() {
        // Comprehensive runs debate by default; no explicit opt-in.
        let mut parameters = AnalysisParameters::default();
        parameters.max_debate_rounds = 2;
        parameters.max_risk_rounds = 1;

        let outcome = graph(vec![])
            .run(&request(AnalysisKind::Comprehensive, parameters))
            .await
            .unwrap();

        // Debate: bull,bear,bull,bear, exactly 2 turns per round.
        let speakers: Vec<&str> = outcome
            .debate_history
            .iter()
            .map(|t| t.speaker.as_str())
            .collect();
        assert_eq!(speakers, vec!["bull", "bear", "bull", "bear"]);

        // Risk rotation: one full risky/safe/neutral cycle.
        let risk_speakers: Vec<&str> = outcome
            .risk_history
            .iter()
            .map(|t| t.speaker.as_str())
            .collect();
        assert_eq!(risk_speakers, vec!["risky", "safe", "neutral"]);

        assert!(outcome.reports.bull.is_some());
        assert!(outcome.reports.bear.is_some());
        assert!(outcome.reports.risk_assessment.is_some());
        assert!(outcome.reports.investment_plan.is_some());
        assert!(outcome.reports.trade_decision.is_some());
        let recommendation = outcome.final_recommendation.unwrap();
        assert_eq!(recommendation.action, "buy");
        assert!(recommendation.confidence > 0.0);
    }

    #[tokio::test]
    async fn explicit_opt_out_skips_debate_in_comprehensive() {
        let mut parameters = AnalysisParameters::default();
        parameters.enable_debate = Some(false);
        let outcome = graph(vec![])
            .run(&request(AnalysisKind::Comprehensive, parameters))
            .await
            .unwrap();
        assert!(outcome.debate_history.is_empty());
        assert!(outcome.reports.bull.is_none());
        assert!(outcome.reports.bear.is_none());
        // The rest of the pipeline still completes.
        assert!(outcome.reports.risk_assessment.is_some());
        assert!(outcome.final_recommendation.is_some());
    }

    #[tokio::test]
    async fn debate_kind_runs_sequential_analysts_then_debate() {
        let mut parameters = AnalysisParameters::default();
        parameters.max_debate_rounds = 1;
        let outcome = graph(vec![])
            .run(&request(AnalysisKind::Debate, parameters))
            .await
            .unwrap();
        assert_eq!(outcome.debate_history.len(), 2);
        assert!(outcome.reports.fundamentals.is_some());
        assert!(outcome.reports.technical.is_some());
        assert!(outcome.reports.investment_plan.is_some());
    }

    #[tokio::test]
    async fn terminal_outcome_round_trips_through_json() {
        let mut parameters = AnalysisParameters::default();
        parameters.max_debate_rounds = 1;
        let outcome = graph(vec![])
            .run(&request(AnalysisKind::Comprehensive, parameters))
            .await
            .unwrap();

        let raw = serde_json::to_string(&outcome).unwrap();
        let restored: AnalysisOutcome = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.symbol, outcome.symbol);
        assert_eq!(restored.kind, outcome.kind);
        assert_eq!(restored.debate_history.len(), outcome.debate_history.len());
        assert_eq!(restored.risk_history.len(), outcome.risk_history.len());
        assert_eq!(restored.completed_steps, outcome.completed_steps);
        assert_eq!(
            restored.final_recommendation.as_ref().map(|r| r.action.clone()),
            outcome.final_recommendation.as_ref().map(|r| r.action.clone())
        );
    }
}
