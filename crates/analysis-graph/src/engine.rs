use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use council_core::{
    AnalysisKind, AnalysisRequest, CouncilError, CouncilResult, DataCategory, DataPayload,
    MarketType,
};

use crate::invoker::{store_outcome_memories, AgentInvoker};
use crate::nodes::{
    lookup_edge, ConsensusCheck, DebateRotation, Edge, GraphNode, RiskRotation,
};
use crate::state::{AnalysisOutcome, AnalysisState};

/// Guard against accidental cycles in the transition tables.
const MAX_NODE_VISITS: u32 = 100;

/// The market-data seam the engine reads through; the tiered cache is
/// the real implementation, tests plug in stubs.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        market: MarketType,
        category: DataCategory,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<DataPayload>;
}

/// State-machine driver for one analysis: walks the per-kind transition
/// table, delegating agent nodes to the invoker and rotations to their
/// cursors, until the END sentinel.
pub struct AnalysisGraph {
    invoker: AgentInvoker,
    data: Arc<dyn MarketDataProvider>,
    consensus: Option<Box<dyn Fn() -> Box<dyn ConsensusCheck> + Send + Sync>>,
}

impl AnalysisGraph {
    pub fn new(invoker: AgentInvoker, data: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            invoker,
            data,
            consensus: None,
        }
    }

    /// Install a consensus-check factory used by each run's debate.
    pub fn with_consensus_factory(
        mut self,
        factory: impl Fn() -> Box<dyn ConsensusCheck> + Send + Sync + 'static,
    ) -> Self {
        self.consensus = Some(Box::new(factory));
        self
    }

    pub async fn run(&self, request: &AnalysisRequest) -> CouncilResult<AnalysisOutcome> {
        request.validate()?;

        let mut state = AnalysisState::new(
            &request.symbol,
            request.market,
            request.kind,
            request.analysis_date,
            request.parameters.clone(),
        );
        tracing::info!(
            symbol = %state.symbol,
            kind = request.kind.as_str(),
            "starting analysis graph"
        );

        let mut debate = match &self.consensus {
            Some(factory) => {
                DebateRotation::with_consensus(state.parameters.max_debate_rounds, factory())
            }
            None => DebateRotation::new(state.parameters.max_debate_rounds),
        };
        let mut risk = RiskRotation::new(state.parameters.max_risk_rounds);

        let mut node = GraphNode::DataCollect;
        let mut visits = 0u32;

        while node != GraphNode::End {
            visits += 1;
            if visits > MAX_NODE_VISITS {
                return Err(CouncilError::Internal(format!(
                    "graph exceeded {MAX_NODE_VISITS} node visits at {}",
                    node.step_name()
                )));
            }

            node = match node {
                GraphNode::DataCollect => {
                    self.collect_data(&mut state).await?;
                    self.follow(node, &state)
                }
                GraphNode::AnalystFanOut => {
                    self.fan_out(&mut state).await;
                    self.follow(node, &state)
                }
                GraphNode::DebateGate => match debate.next_speaker(&state) {
                    Some(speaker) => {
                        let content = self
                            .invoker
                            .invoke(speaker.node(), &mut state)
                            .await
                            .unwrap_or_else(|| "(no argument produced)".to_string());
                        debate.record(&mut state, speaker, &content);
                        GraphNode::DebateGate
                    }
                    None => {
                        state.debate_summary = Some(debate_summary(&state, debate.round()));
                        self.debate_exit(&state)
                    }
                },
                GraphNode::RiskGate => {
                    if !state.parameters.enable_risk_assessment {
                        GraphNode::ResearchManager
                    } else {
                        match risk.next_speaker() {
                            Some(speaker) => {
                                let content = self
                                    .invoker
                                    .invoke(speaker.node(), &mut state)
                                    .await
                                    .unwrap_or_else(|| "(no view produced)".to_string());
                                risk.record(&mut state, speaker, &content);
                                GraphNode::RiskGate
                            }
                            None => {
                                state.risk_summary = Some(risk_summary(&state));
                                GraphNode::RiskManager
                            }
                        }
                    }
                }
                other => {
                    let _ = self.invoker.invoke(other, &mut state).await;
                    self.follow(other, &state)
                }
            };
        }

        let success = state.final_recommendation.is_some();
        if success {
            store_outcome_memories(&self.invoker, &state).await;
        }
        tracing::info!(
            symbol = %state.symbol,
            success,
            steps = state.completed_steps.len(),
            errors = state.errors.len(),
            "analysis graph finished"
        );
        Ok(AnalysisOutcome::from_state(&state, success))
    }

    /// Resolve the transition table entry for a node just executed.
    fn follow(&self, node: GraphNode, state: &AnalysisState) -> GraphNode {
        match lookup_edge(state.kind, node) {
            Some(Edge::To(next)) => next,
            Some(Edge::RiskOrElse(alt)) => {
                if state.parameters.enable_risk_assessment {
                    GraphNode::RiskManager
                } else {
                    alt
                }
            }
            Some(Edge::DebateOrElse(alt)) => {
                if state.parameters.debate_enabled(state.kind) {
                    GraphNode::DebateGate
                } else {
                    alt
                }
            }
            None => GraphNode::End,
        }
    }

    /// Where the debate hands off once exhausted.
    fn debate_exit(&self, state: &AnalysisState) -> GraphNode {
        match state.kind {
            AnalysisKind::Comprehensive if state.parameters.enable_risk_assessment => {
                GraphNode::RiskGate
            }
            _ => GraphNode::ResearchManager,
        }
    }

    /// Fill the input buckets. Missing primary data is terminal for the
    /// single-analyst kinds; everything else degrades with an error note.
    async fn collect_data(&self, state: &mut AnalysisState) -> CouncilResult<()> {
        state.current_step = GraphNode::DataCollect.step_name().to_string();
        let end = state.current_date;
        let start = end - chrono::Duration::days(state.parameters.lookback_days.max(1));

        let wanted: &[DataCategory] = match state.kind {
            AnalysisKind::Fundamentals => {
                &[DataCategory::BasicInfo, DataCategory::Fundamentals, DataCategory::PriceData]
            }
            AnalysisKind::Technical => &[DataCategory::BasicInfo, DataCategory::PriceData],
            AnalysisKind::News => &[DataCategory::BasicInfo, DataCategory::News],
            AnalysisKind::Comprehensive | AnalysisKind::Debate => &[
                DataCategory::BasicInfo,
                DataCategory::PriceData,
                DataCategory::Fundamentals,
                DataCategory::News,
            ],
        };

        for category in wanted {
            match self
                .data
                .fetch(&state.symbol, state.market, *category, start, end)
                .await
            {
                Ok(payload) => state.apply_data(payload),
                Err(err) => {
                    let required = matches!(
                        (state.kind, *category),
                        (AnalysisKind::Fundamentals, DataCategory::Fundamentals)
                            | (AnalysisKind::Technical, DataCategory::PriceData)
                    );
                    if required {
                        return Err(CouncilError::Unavailable(format!(
                            "primary data missing for {} ({category}): {err}",
                            state.symbol
                        )));
                    }
                    tracing::warn!(
                        symbol = %state.symbol,
                        category = %category,
                        error = %err,
                        "data collection degraded"
                    );
                    state.push_error("data_collection", &err.to_string());
                }
            }
        }

        state.complete_step(GraphNode::DataCollect.step_name());
        Ok(())
    }

    /// Comprehensive-mode analyst fan-out: each enabled analyst runs on a
    /// defensive copy of the state, and outputs merge by report slot.
    /// Slots are disjoint by construction.
    async fn fan_out(&self, state: &mut AnalysisState) {
        state.current_step = GraphNode::AnalystFanOut.step_name().to_string();

        let mut branches = Vec::new();
        if state.parameters.enable_fundamentals {
            branches.push(GraphNode::FundamentalsAnalyst);
        }
        if state.parameters.enable_technical {
            branches.push(GraphNode::MarketAnalyst);
        }
        if state.parameters.enable_news {
            branches.push(GraphNode::NewsAnalyst);
        }
        if state.parameters.enable_social {
            branches.push(GraphNode::SocialAnalyst);
        }

        let base_messages = state.messages.len();
        let base_errors = state.errors.len();

        let futures = branches.into_iter().map(|node| {
            let mut branch_state = state.clone();
            let invoker = &self.invoker;
            async move {
                let _ = invoker.invoke(node, &mut branch_state).await;
                (node, branch_state)
            }
        });
        let results = futures_util::future::join_all(futures).await;

        for (node, branch) in results {
            match node {
                GraphNode::FundamentalsAnalyst => {
                    debug_assert!(state.fundamentals_report.is_none());
                    state.fundamentals_report = branch.fundamentals_report;
                }
                GraphNode::MarketAnalyst => {
                    debug_assert!(state.technical_report.is_none());
                    state.technical_report = branch.technical_report;
                }
                GraphNode::NewsAnalyst => {
                    debug_assert!(state.news_report.is_none());
                    state.news_report = branch.news_report;
                    state.sentiment_report = branch.sentiment_report;
                }
                GraphNode::SocialAnalyst => {
                    debug_assert!(state.social_report.is_none());
                    state.social_report = branch.social_report;
                }
                _ => {}
            }
            for message in branch.messages.into_iter().skip(base_messages) {
                state.messages.push(message);
            }
            for error in branch.errors.into_iter().skip(base_errors) {
                state.errors.push(error);
            }
            for step in branch.completed_steps {
                state.complete_step(&step);
            }
        }

        state.complete_step(GraphNode::AnalystFanOut.step_name());
    }
}

fn debate_summary(state: &AnalysisState, rounds: u32) -> String {
    let bulls = state
        .debate_history
        .iter()
        .filter(|t| t.speaker == "bull")
        .count();
    let bears = state.debate_history.len() - bulls;
    format!("{rounds} round(s) debated: {bulls} bull argument(s), {bears} bear argument(s)")
}

fn risk_summary(state: &AnalysisState) -> String {
    let count = |speaker: &str| {
        state
            .risk_history
            .iter()
            .filter(|t| t.speaker == speaker)
            .count()
    };
    format!(
        "risk debate closed: {} risky, {} safe, {} neutral view(s)",
        count("risky"),
        count("safe"),
        count("neutral")
    )
}
