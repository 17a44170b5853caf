use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use council_core::CouncilResult;
use llm_router::{ChatCompletion, ChatMessage, ChatOptions, CompletionRequest, ModelRouter};
use memory_client::MemoryClient;

use crate::nodes::GraphNode;
use crate::state::{AnalysisState, FinalRecommendation, RiskAssessment};

/// The LLM seam the invoker talks through. `ModelRouter` is the real
/// implementation; tests plug in stubs.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> CouncilResult<ChatCompletion>;
}

#[async_trait]
impl CompletionProvider for ModelRouter {
    async fn complete(&self, request: &CompletionRequest) -> CouncilResult<ChatCompletion> {
        ModelRouter::complete(self, request).await
    }
}

/// The single generic agent primitive: build a context slice for the
/// role, call the routed LLM, write the output into the state.
pub struct AgentInvoker {
    llm: Arc<dyn CompletionProvider>,
    memory: Arc<MemoryClient>,
}

impl AgentInvoker {
    pub fn new(llm: Arc<dyn CompletionProvider>, memory: Arc<MemoryClient>) -> Self {
        Self { llm, memory }
    }

    pub fn memory(&self) -> &MemoryClient {
        &self.memory
    }

    /// Run one agent node against the state. On success the role's
    /// report slot and the message log are updated; on failure the error
    /// list grows and the caller advances anyway (best effort), so this
    /// returns the content only for nodes whose output feeds a rotation.
    pub async fn invoke(&self, node: GraphNode, state: &mut AnalysisState) -> Option<String> {
        let step = node.step_name();
        state.current_step = step.to_string();

        let (system, user) = self.build_prompt(node, state).await;
        let request = CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            task_type: task_tag(node).to_string(),
            model_preference: state
                .parameters
                .model_name
                .clone()
                .unwrap_or_else(|| "auto".to_string()),
            options: ChatOptions {
                max_tokens: state.parameters.max_tokens,
                temperature: state.parameters.temperature,
            },
            user_id: None,
            use_prompt_template: false,
            language: None,
        };

        match self.llm.complete(&request).await {
            Ok(completion) => {
                let content = completion.content;
                state.push_message(step, &content);
                self.write_report(node, state, &content);
                state.complete_step(step);
                Some(content)
            }
            Err(err) => {
                tracing::warn!(step, symbol = %state.symbol, error = %err, "agent node failed");
                state.push_error(step, &err.to_string());
                state.complete_step(step);
                None
            }
        }
    }

    fn write_report(&self, node: GraphNode, state: &mut AnalysisState, content: &str) {
        match node {
            GraphNode::FundamentalsAnalyst => {
                state.fundamentals_report = Some(content.to_string());
            }
            GraphNode::MarketAnalyst => state.technical_report = Some(content.to_string()),
            GraphNode::NewsAnalyst => {
                state.news_report = Some(content.to_string());
                // The news analyst covers sentiment in the same pass.
                state.sentiment_report = Some(content.to_string());
            }
            GraphNode::SocialAnalyst => state.social_report = Some(content.to_string()),
            GraphNode::BullResearcher => state.bull_report = Some(content.to_string()),
            GraphNode::BearResearcher => state.bear_report = Some(content.to_string()),
            GraphNode::RiskyAnalyst => state.risky_report = Some(content.to_string()),
            GraphNode::SafeAnalyst => state.safe_report = Some(content.to_string()),
            GraphNode::NeutralAnalyst => state.neutral_report = Some(content.to_string()),
            GraphNode::RiskManager => {
                state.risk_assessment = Some(parse_risk_assessment(content));
            }
            GraphNode::ResearchManager => state.investment_plan = Some(content.to_string()),
            GraphNode::Trader => state.trade_decision = Some(content.to_string()),
            GraphNode::ReportGen => {
                state.final_recommendation = Some(parse_final_recommendation(content));
            }
            _ => {}
        }
    }

    async fn build_prompt(&self, node: GraphNode, state: &AnalysisState) -> (String, String) {
        let context = context_slice(node, state);
        let recall = self.recall(node, state, &context).await;
        let system = system_prompt(node).to_string();

        let mut user = format!(
            "Symbol: {} ({})\nAnalysis date: {}\n\n{context}",
            state.symbol, state.company_name, state.current_date
        );
        if !recall.is_empty() {
            user.push_str("\n\nLessons from similar past situations:\n");
            user.push_str(&recall);
        }
        user.push_str(output_instruction(node));

        (system, user)
    }

    /// Per-role recall from the vector memory; silent on any failure.
    async fn recall(&self, node: GraphNode, state: &AnalysisState, context: &str) -> String {
        let Some(collection) = memory_collection(node) else {
            return String::new();
        };
        let situation = format!("{} {}", state.symbol, truncate(context, 600));
        let matches = self.memory.query(collection, &situation, 2, 0.1).await;
        matches
            .iter()
            .map(|m| format!("- {}", m.recommendation))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn task_tag(node: GraphNode) -> &'static str {
    match node {
        GraphNode::FundamentalsAnalyst | GraphNode::RiskManager => "financial_analysis",
        GraphNode::MarketAnalyst | GraphNode::Trader => "stock_analysis",
        GraphNode::NewsAnalyst | GraphNode::SocialAnalyst => "market_research",
        GraphNode::ReportGen => "data_extraction",
        _ => "reasoning",
    }
}

fn memory_collection(node: GraphNode) -> Option<&'static str> {
    match node {
        GraphNode::BullResearcher => Some(memory_client::BULL_MEMORY),
        GraphNode::BearResearcher => Some(memory_client::BEAR_MEMORY),
        GraphNode::Trader => Some(memory_client::TRADER_MEMORY),
        GraphNode::RiskManager => Some(memory_client::RISK_MANAGER_MEMORY),
        GraphNode::ResearchManager => Some(memory_client::RESEARCH_MANAGER_MEMORY),
        _ => None,
    }
}

fn system_prompt(node: GraphNode) -> &'static str {
    match node {
        GraphNode::FundamentalsAnalyst => {
            "You are a fundamentals analyst. Assess valuation, profitability, and balance \
             sheet health strictly from the data provided."
        }
        GraphNode::MarketAnalyst => {
            "You are a technical analyst. Read trend, momentum, and volume from the price \
             series provided and state clear levels."
        }
        GraphNode::NewsAnalyst => {
            "You are a news analyst. Summarize the material events and the net sentiment \
             they imply for the stock."
        }
        GraphNode::SocialAnalyst => {
            "You are a social-media analyst. Gauge retail attention and crowd sentiment \
             from the discussion excerpts provided."
        }
        GraphNode::BullResearcher => {
            "You are the bull researcher in an investment debate. Argue the strongest \
             evidence-based case for buying, and rebut the bear's latest points directly."
        }
        GraphNode::BearResearcher => {
            "You are the bear researcher in an investment debate. Argue the strongest \
             evidence-based case against buying, and rebut the bull's latest points directly."
        }
        GraphNode::RiskyAnalyst => {
            "You are the aggressive risk debator. Make the case that the upside justifies \
             taking this position despite the risks."
        }
        GraphNode::SafeAnalyst => {
            "You are the conservative risk debator. Make the case for capital preservation \
             and the concrete ways this position loses money."
        }
        GraphNode::NeutralAnalyst => {
            "You are the neutral risk debator. Weigh both prior stances and identify which \
             risks are actually priced in."
        }
        GraphNode::RiskManager => {
            "You are the risk manager. Weigh the full risk debate and reports into a single \
             verdict on position risk."
        }
        GraphNode::ResearchManager => {
            "You are the research manager. Judge the debate, pick the stronger side, and \
             lay out an actionable investment plan."
        }
        GraphNode::Trader => {
            "You are the trader. Turn the investment plan into a concrete trade decision \
             with entry, sizing, and exit conditions."
        }
        GraphNode::ReportGen => {
            "You compile the final recommendation from completed analysis reports. Output \
             only the requested JSON."
        }
        _ => "You are a financial analysis assistant.",
    }
}

fn output_instruction(node: GraphNode) -> &'static str {
    match node {
        GraphNode::RiskManager => {
            "\n\nRespond with JSON only: {\"level\": \"low|medium|high\", \"score\": \
             <0-100>, \"text\": \"<verdict>\"}"
        }
        GraphNode::ReportGen => {
            "\n\nRespond with JSON only: {\"action\": \"buy|hold|sell\", \"confidence\": \
             <0.0-1.0>, \"target_price\": <number or null>, \"reasoning\": \"<summary>\"}"
        }
        _ => "",
    }
}

/// Curated view of the state each role sees.
fn context_slice(node: GraphNode, state: &AnalysisState) -> String {
    let mut sections: Vec<String> = Vec::new();

    match node {
        GraphNode::FundamentalsAnalyst => {
            sections.push(fundamentals_summary(state));
            sections.push(info_summary(state));
        }
        GraphNode::MarketAnalyst => {
            sections.push(price_summary(state));
        }
        GraphNode::NewsAnalyst | GraphNode::SocialAnalyst => {
            sections.push(news_summary(state));
        }
        GraphNode::BullResearcher | GraphNode::BearResearcher => {
            sections.push(report_section("Fundamentals", &state.fundamentals_report));
            sections.push(report_section("Technical", &state.technical_report));
            sections.push(report_section("News", &state.news_report));
            sections.push(debate_transcript(state));
        }
        GraphNode::RiskyAnalyst | GraphNode::SafeAnalyst | GraphNode::NeutralAnalyst => {
            sections.push(report_section("Investment debate (bull)", &state.bull_report));
            sections.push(report_section("Investment debate (bear)", &state.bear_report));
            sections.push(risk_transcript(state));
        }
        GraphNode::RiskManager => {
            sections.push(report_section("Fundamentals", &state.fundamentals_report));
            sections.push(report_section("Technical", &state.technical_report));
            sections.push(risk_transcript(state));
        }
        GraphNode::ResearchManager => {
            sections.push(report_section("Fundamentals", &state.fundamentals_report));
            sections.push(report_section("Technical", &state.technical_report));
            sections.push(report_section("News", &state.news_report));
            sections.push(debate_transcript(state));
            if let Some(risk) = &state.risk_assessment {
                sections.push(format!(
                    "Risk verdict: {} (score {:.0})\n{}",
                    risk.level, risk.score, risk.text
                ));
            }
        }
        GraphNode::Trader => {
            sections.push(report_section("Investment plan", &state.investment_plan));
            if let Some(risk) = &state.risk_assessment {
                sections.push(format!("Risk verdict: {} (score {:.0})", risk.level, risk.score));
            }
            sections.push(price_summary(state));
        }
        GraphNode::ReportGen => {
            sections.push(report_section("Fundamentals", &state.fundamentals_report));
            sections.push(report_section("Technical", &state.technical_report));
            sections.push(report_section("News", &state.news_report));
            sections.push(report_section("Investment plan", &state.investment_plan));
            sections.push(report_section("Trade decision", &state.trade_decision));
        }
        _ => {}
    }

    sections.retain(|s| !s.is_empty());
    if sections.is_empty() {
        "No input data is available; state that explicitly.".to_string()
    } else {
        sections.join("\n\n")
    }
}

fn report_section(title: &str, report: &Option<String>) -> String {
    match report {
        Some(text) => format!("{title} report:\n{}", truncate(text, 2000)),
        None => String::new(),
    }
}

fn info_summary(state: &AnalysisState) -> String {
    match &state.market_data {
        Some(info) => format!(
            "Company: {} | market: {} | industry: {}",
            info.name,
            info.market.as_key(),
            info.industry.as_deref().unwrap_or("unknown")
        ),
        None => String::new(),
    }
}

fn price_summary(state: &AnalysisState) -> String {
    let Some(bars) = &state.price_data else {
        return String::new();
    };
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return String::new();
    };
    let change = if first.close != 0.0 {
        (last.close - first.close) / first.close * 100.0
    } else {
        0.0
    };
    let high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let recent: Vec<String> = bars
        .iter()
        .rev()
        .take(10)
        .map(|b| format!("{} close={:.2} vol={:.0}", b.date, b.close, b.volume))
        .collect();
    format!(
        "Price series {} to {} ({} bars): change {change:+.1}%, range {low:.2}-{high:.2}\nRecent bars:\n{}",
        first.date,
        last.date,
        bars.len(),
        recent.join("\n")
    )
}

fn fundamentals_summary(state: &AnalysisState) -> String {
    let Some(reports) = &state.financial_data else {
        return String::new();
    };
    let Some(latest) = reports.last() else {
        return String::new();
    };
    let mut ratios: Vec<(&String, &f64)> = latest.ratios.iter().collect();
    ratios.sort_by(|a, b| a.0.cmp(b.0));
    let lines: Vec<String> = ratios
        .iter()
        .take(20)
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect();
    format!(
        "Fundamentals as of {}:\n{}",
        latest.report_date,
        lines.join(", ")
    )
}

fn news_summary(state: &AnalysisState) -> String {
    let Some(items) = &state.news_data else {
        return String::new();
    };
    let lines: Vec<String> = items
        .iter()
        .take(10)
        .map(|n| {
            format!(
                "- [{}] {} ({})",
                n.publish_time.format("%Y-%m-%d"),
                n.title,
                n.source
            )
        })
        .collect();
    format!("Recent news:\n{}", lines.join("\n"))
}

fn debate_transcript(state: &AnalysisState) -> String {
    if state.debate_history.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = state
        .debate_history
        .iter()
        .map(|t| format!("[round {} | {}] {}", t.round, t.speaker, truncate(&t.content, 500)))
        .collect();
    format!("Debate so far:\n{}", lines.join("\n"))
}

fn risk_transcript(state: &AnalysisState) -> String {
    if state.risk_history.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = state
        .risk_history
        .iter()
        .map(|t| format!("[round {} | {}] {}", t.round, t.speaker, truncate(&t.content, 500)))
        .collect();
    format!("Risk debate so far:\n{}", lines.join("\n"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

/// Strip markdown fences models love to wrap JSON in.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

pub fn parse_risk_assessment(content: &str) -> RiskAssessment {
    if let Ok(parsed) = serde_json::from_str::<RiskAssessment>(extract_json(content)) {
        return parsed;
    }
    // Free-text fallback: classify from keywords, keep the prose.
    let lower = content.to_lowercase();
    let (level, score) = if lower.contains("high risk") || lower.contains("high-risk") {
        ("high", 75.0)
    } else if lower.contains("low risk") || lower.contains("low-risk") {
        ("low", 25.0)
    } else {
        ("medium", 50.0)
    };
    RiskAssessment {
        level: level.to_string(),
        score,
        text: content.to_string(),
    }
}

pub fn parse_final_recommendation(content: &str) -> FinalRecommendation {
    if let Ok(parsed) = serde_json::from_str::<FinalRecommendation>(extract_json(content)) {
        return parsed;
    }
    let lower = content.to_lowercase();
    let action = if lower.contains("sell") {
        "sell"
    } else if lower.contains("buy") {
        "buy"
    } else {
        "hold"
    };
    FinalRecommendation {
        action: action.to_string(),
        confidence: 0.5,
        target_price: None,
        reasoning: content.to_string(),
    }
}

/// Write the terminal decision back to the role memories so future runs
/// can recall it. Failures are already swallowed by the client.
pub async fn store_outcome_memories(
    invoker: &AgentInvoker,
    state: &AnalysisState,
) {
    let Some(recommendation) = &state.final_recommendation else {
        return;
    };
    let situation = format!(
        "{} on {}: {}",
        state.symbol,
        state.current_date,
        truncate(
            state
                .investment_plan
                .as_deref()
                .unwrap_or(&recommendation.reasoning),
            600
        )
    );
    let advice = format!(
        "{} (confidence {:.2}): {}",
        recommendation.action,
        recommendation.confidence,
        truncate(&recommendation.reasoning, 400)
    );
    let mut metadata = HashMap::new();
    metadata.insert(
        "symbol".to_string(),
        serde_json::Value::String(state.symbol.clone()),
    );
    metadata.insert(
        "date".to_string(),
        serde_json::Value::String(state.current_date.to_string()),
    );

    for collection in [
        memory_client::TRADER_MEMORY,
        memory_client::RESEARCH_MANAGER_MEMORY,
    ] {
        invoker
            .memory()
            .add(collection, &situation, &advice, metadata.clone())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_json_parses_and_fenced_json_parses() {
        let parsed = parse_risk_assessment(r#"{"level": "high", "score": 80, "text": "crowded"}"#);
        assert_eq!(parsed.level, "high");

        let fenced = "```json\n{\"level\": \"low\", \"score\": 20, \"text\": \"calm\"}\n```";
        assert_eq!(parse_risk_assessment(fenced).level, "low");
    }

    #[test]
    fn risk_prose_falls_back_to_keywords() {
        let parsed = parse_risk_assessment("This is a high risk setup given leverage.");
        assert_eq!(parsed.level, "high");
        assert!(parsed.text.contains("leverage"));
    }

    #[test]
    fn recommendation_prose_falls_back_to_action_keyword() {
        let parsed = parse_final_recommendation("We would buy on weakness.");
        assert_eq!(parsed.action, "buy");
        assert_eq!(parsed.confidence, 0.5);
    }
}
