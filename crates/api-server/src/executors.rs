use std::sync::Arc;

use analysis_graph::{AnalysisGraph, MarketDataProvider};
use async_trait::async_trait;
use chrono::NaiveDate;
use council_core::{CouncilError, CouncilResult, DataCategory, DataPayload, MarketType};
use tiered_cache::TieredCache;
use workflow_scheduler::{TaskExecutor, TaskSnapshot};

/// Bridges the graph engine's data seam onto the tiered cache.
pub struct CachedDataProvider {
    cache: Arc<TieredCache>,
}

impl CachedDataProvider {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl MarketDataProvider for CachedDataProvider {
    async fn fetch(
        &self,
        symbol: &str,
        market: MarketType,
        category: DataCategory,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CouncilResult<DataPayload> {
        self.cache
            .get_data(symbol, market, category, start, end, false)
            .await
            .map(|entry| entry.payload)
    }
}

/// The workflow executor: every task kind resolves to a graph run on the
/// task's embedded request.
pub struct AnalysisExecutor {
    graph: Arc<AnalysisGraph>,
}

impl AnalysisExecutor {
    pub fn new(graph: Arc<AnalysisGraph>) -> Arc<Self> {
        Arc::new(Self { graph })
    }

    /// The task kinds this executor serves.
    pub const KINDS: &'static [&'static str] = &["analysis", "debate", "risk_assessment"];
}

#[async_trait]
impl TaskExecutor for AnalysisExecutor {
    async fn execute(&self, task: TaskSnapshot) -> CouncilResult<serde_json::Value> {
        let outcome = self.graph.run(&task.request).await?;
        serde_json::to_value(&outcome)
            .map_err(|e| CouncilError::Internal(format!("outcome serialization failed: {e}")))
    }
}
