use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Per-role collection names in the vector service.
pub const BULL_MEMORY: &str = "bull_memory";
pub const BEAR_MEMORY: &str = "bear_memory";
pub const TRADER_MEMORY: &str = "trader_memory";
pub const RISK_MANAGER_MEMORY: &str = "risk_manager_memory";
pub const RESEARCH_MANAGER_MEMORY: &str = "research_manager_memory";

/// A recalled situation/recommendation pair with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub situation: String,
    pub recommendation: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<MemoryMatch>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

/// Client for the vector-memory service. The service is a black box with
/// add/query semantics; everything here degrades silently so an absent
/// or unhealthy memory service never blocks an analysis.
pub struct MemoryClient {
    base_url: Option<String>,
    client: Client,
    /// Collections known to exist, so repeat nodes skip the create call.
    known_collections: DashMap<String, ()>,
}

impl MemoryClient {
    /// `base_url = None` builds a disabled client whose recalls are
    /// always empty.
    pub fn new(base_url: Option<String>) -> Self {
        if base_url.is_none() {
            tracing::info!("memory service not configured, recall disabled");
        }
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            known_collections: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn health_check(&self) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };
        match self.client.get(format!("{base}/health")).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<HealthResponse>()
                .await
                .map(|h| h.status == "healthy")
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Store a situation -> recommendation pair in a role collection.
    pub async fn add(
        &self,
        collection: &str,
        situation: &str,
        recommendation: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        let Some(base) = &self.base_url else {
            return;
        };
        self.ensure_collection(collection).await;

        let payload = json!({
            "collection_name": collection,
            "situation": situation,
            "recommendation": recommendation,
            "metadata": metadata,
        });

        match self
            .client
            .post(format!("{base}/api/v1/memory/add"))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(collection, "memory stored");
            }
            Ok(response) => {
                tracing::warn!(collection, status = %response.status(), "memory add rejected");
            }
            Err(err) => {
                tracing::warn!(collection, error = %err, "memory add failed");
            }
        }
    }

    /// Recall the `k` most similar situations above `threshold`. Returns
    /// an empty list on any failure.
    pub async fn query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
        threshold: f64,
    ) -> Vec<MemoryMatch> {
        let Some(base) = &self.base_url else {
            return Vec::new();
        };

        let payload = json!({
            "collection_name": collection,
            "query": text,
            "n_results": k,
            "similarity_threshold": threshold,
        });

        match self
            .client
            .post(format!("{base}/api/v1/memory/search"))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response
                .json::<SearchResponse>()
                .await
                .map(|r| r.data)
                .unwrap_or_default(),
            Ok(response) => {
                tracing::warn!(collection, status = %response.status(), "memory search rejected");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(collection, error = %err, "memory search failed");
                Vec::new()
            }
        }
    }

    /// Process-local handle cache with double-checked creation; the
    /// create endpoint is idempotent on the service side.
    async fn ensure_collection(&self, collection: &str) {
        if self.known_collections.contains_key(collection) {
            return;
        }
        let Some(base) = &self.base_url else {
            return;
        };

        let payload = json!({ "collection_name": collection });
        match self
            .client
            .post(format!("{base}/api/v1/memory/collections"))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                self.known_collections.insert(collection.to_string(), ());
            }
            Ok(response) => {
                tracing::debug!(collection, status = %response.status(), "collection create rejected");
            }
            Err(err) => {
                tracing::debug!(collection, error = %err, "collection create failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_recalls_nothing() {
        let client = MemoryClient::new(None);
        assert!(!client.enabled());
        assert!(!client.health_check().await);
        let matches = client.query(BULL_MEMORY, "earnings beat", 3, 0.2).await;
        assert!(matches.is_empty());
        // add on a disabled client is a no-op, not an error
        client
            .add(BULL_MEMORY, "situation", "recommendation", HashMap::new())
            .await;
    }
}
