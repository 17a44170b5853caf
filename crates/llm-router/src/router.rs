use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use council_core::{CouncilError, CouncilResult};
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::adapter::LlmAdapter;
use crate::prompts::PromptRegistry;
use crate::providers::{GoogleAdapter, OpenAiCompatAdapter};
use crate::types::{
    ChatCompletion, ChatMessage, CompletionRequest, ModelInfo, StreamDelta,
};
use crate::usage::{UsageRecord, UsageTracker};

/// Candidate models per task tag, tried primary-first then fallback.
const TASK_ROUTES: &[(&str, &[&str], &[&str])] = &[
    (
        "financial_analysis",
        &["deepseek-chat", "qwen-plus", "gpt-4", "gemini-pro"],
        &["gpt-3.5-turbo", "qwen-turbo", "gemini-1.5-flash"],
    ),
    (
        "stock_analysis",
        &["deepseek-chat", "qwen-plus", "gpt-4"],
        &["gemini-pro", "gpt-3.5-turbo"],
    ),
    (
        "tool_calling",
        &["gpt-4", "deepseek-chat", "qwen-plus"],
        &["gemini-pro", "gpt-3.5-turbo"],
    ),
    (
        "data_extraction",
        &["gpt-4", "qwen-plus", "gemini-pro"],
        &["deepseek-chat", "gpt-3.5-turbo"],
    ),
    (
        "market_research",
        &["qwen-plus", "deepseek-chat", "gpt-4"],
        &["gemini-pro", "gpt-3.5-turbo"],
    ),
    (
        "reasoning",
        &["deepseek-chat", "gpt-4", "gemini-pro"],
        &["qwen-plus", "gpt-3.5-turbo"],
    ),
    (
        "chinese_tasks",
        &["qwen-plus", "deepseek-chat", "qwen-turbo"],
        &["gpt-4", "gemini-pro"],
    ),
    (
        "general",
        &["deepseek-chat", "qwen-plus", "gpt-4", "gemini-pro"],
        &["gpt-3.5-turbo", "qwen-turbo", "gemini-1.5-flash"],
    ),
];

fn task_route(task_type: &str) -> (&'static [&'static str], &'static [&'static str]) {
    TASK_ROUTES
        .iter()
        .find(|(tag, ..)| *tag == task_type)
        .or_else(|| TASK_ROUTES.iter().find(|(tag, ..)| *tag == "general"))
        .map(|(_, primary, fallback)| (*primary, *fallback))
        .expect("general route is always present")
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model: String,
    pub provider: String,
    pub healthy: bool,
    pub info: ModelInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    pub total_models: usize,
    pub healthy_models: usize,
    pub supported_tasks: Vec<String>,
    pub model_providers: HashMap<String, String>,
}

/// Task-aware, health-aware completion router over the adapter registry.
pub struct ModelRouter {
    adapters: HashMap<String, Arc<dyn LlmAdapter>>,
    health_cache: DashMap<String, bool>,
    usage: Arc<UsageTracker>,
    prompts: PromptRegistry,
}

impl ModelRouter {
    pub fn new(usage: Arc<UsageTracker>) -> Self {
        Self {
            adapters: HashMap::new(),
            health_cache: DashMap::new(),
            usage,
            prompts: PromptRegistry::with_defaults(),
        }
    }

    /// Build the registry from provider credentials in the environment.
    /// A missing key silently skips that provider's models.
    pub fn from_env(usage: Arc<UsageTracker>) -> Self {
        let mut router = Self::new(usage);

        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            if !key.is_empty() {
                for model in ["deepseek-chat", "deepseek-coder"] {
                    router.register(Arc::new(OpenAiCompatAdapter::deepseek(model, key.clone())));
                }
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                for model in ["gpt-4", "gpt-3.5-turbo"] {
                    router.register(Arc::new(OpenAiCompatAdapter::openai(model, key.clone())));
                }
            }
        }
        if let Ok(key) = std::env::var("DASHSCOPE_API_KEY") {
            if !key.is_empty() {
                for model in ["qwen-plus", "qwen-turbo"] {
                    router.register(Arc::new(OpenAiCompatAdapter::dashscope(model, key.clone())));
                }
            }
        }
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            if !key.is_empty() {
                for model in ["gemini-pro", "gemini-1.5-flash"] {
                    router.register(Arc::new(GoogleAdapter::new(model, key.clone())));
                }
            }
        }

        tracing::info!(
            models = ?router.adapters.keys().collect::<Vec<_>>(),
            "model router initialized"
        );
        router
    }

    pub fn register(&mut self, adapter: Arc<dyn LlmAdapter>) {
        self.adapters.insert(adapter.model_name().to_string(), adapter);
    }

    pub fn prompts_mut(&mut self) -> &mut PromptRegistry {
        &mut self.prompts
    }

    async fn is_healthy(&self, model: &str) -> bool {
        if let Some(cached) = self.health_cache.get(model) {
            return *cached;
        }
        let healthy = match self.adapters.get(model) {
            Some(adapter) => adapter.health_check().await,
            None => false,
        };
        self.health_cache.insert(model.to_string(), healthy);
        healthy
    }

    pub async fn refresh_health(&self) {
        self.health_cache.clear();
        for model in self.adapters.keys() {
            self.is_healthy(model).await;
        }
        let healthy = self
            .health_cache
            .iter()
            .filter(|entry| *entry.value())
            .count();
        tracing::info!(
            healthy,
            total = self.adapters.len(),
            "model health refreshed"
        );
    }

    /// Selection order: pinned-if-healthy, task primaries, task
    /// fallbacks, then any healthy model at all.
    pub async fn route(&self, task_type: &str, model_preference: &str) -> CouncilResult<String> {
        if model_preference != "auto" {
            if self.adapters.contains_key(model_preference)
                && self.is_healthy(model_preference).await
            {
                return Ok(model_preference.to_string());
            }
            tracing::warn!(
                model = model_preference,
                "preferred model unavailable, selecting automatically"
            );
        }

        let (primary, fallback) = task_route(task_type);
        for model in primary.iter().chain(fallback.iter()) {
            if self.adapters.contains_key(*model) && self.is_healthy(model).await {
                tracing::debug!(model, task_type, "routed completion");
                return Ok(model.to_string());
            }
        }

        for model in self.adapters.keys() {
            if self.is_healthy(model).await {
                tracing::debug!(model, task_type, "routed to last-resort model");
                return Ok(model.clone());
            }
        }

        Err(CouncilError::Unavailable(format!(
            "no available model for task {task_type}"
        )))
    }

    fn prepared_messages(&self, request: &CompletionRequest) -> Vec<ChatMessage> {
        if !request.use_prompt_template || request.messages.len() != 1 {
            return request.messages.clone();
        }
        let language = request.language.as_deref().unwrap_or("en");
        let Some(template) = self.prompts.lookup("generic", &request.task_type, language) else {
            return request.messages.clone();
        };

        // The caller's single user message becomes the {context} slot.
        let mut vars = HashMap::new();
        vars.insert("context".to_string(), request.messages[0].content.clone());
        vars.insert("symbol".to_string(), String::new());
        vars.insert("date".to_string(), String::new());
        let (system, user) = template.render(&vars);

        // Few-shot examples sit between the system prompt and the live
        // request as alternating user/assistant turns.
        let mut messages = vec![ChatMessage::system(system)];
        for (example_user, example_assistant) in template.rendered_examples(&vars) {
            messages.push(ChatMessage::user(example_user));
            messages.push(ChatMessage::assistant(example_assistant));
        }
        messages.push(ChatMessage::user(user));
        messages
    }

    pub async fn complete(&self, request: &CompletionRequest) -> CouncilResult<ChatCompletion> {
        let model = self
            .route(&request.task_type, &request.model_preference)
            .await?;
        let adapter = self
            .adapters
            .get(&model)
            .ok_or_else(|| CouncilError::Internal(format!("adapter vanished: {model}")))?;

        let messages = self.prepared_messages(request);
        let started = Instant::now();
        let result = adapter.chat(&messages, &request.options).await;

        match &result {
            Ok(completion) => {
                let record = UsageRecord::new(
                    request.user_id.as_deref().unwrap_or("anonymous"),
                    &model,
                    &request.task_type,
                    completion.usage,
                    started.elapsed().as_secs_f64(),
                );
                self.usage.track(record).await;
            }
            Err(err) => {
                // A failing adapter drops out of the cached health view
                // until the next refresh.
                if matches!(
                    err,
                    CouncilError::Auth(_) | CouncilError::Unavailable(_) | CouncilError::Timeout(_)
                ) {
                    self.health_cache.insert(model.clone(), false);
                }
            }
        }

        result
    }

    /// Streamed variant; shares routing and health handling with
    /// `complete`. Usage is metered from the adapter's final counts when
    /// the provider sends them, otherwise left to the stream consumer.
    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> CouncilResult<BoxStream<'static, CouncilResult<StreamDelta>>> {
        let model = self
            .route(&request.task_type, &request.model_preference)
            .await?;
        let adapter = self
            .adapters
            .get(&model)
            .ok_or_else(|| CouncilError::Internal(format!("adapter vanished: {model}")))?;

        let messages = self.prepared_messages(request);
        adapter.chat_stream(&messages, &request.options).await
    }

    pub async fn model_catalog(&self) -> Vec<ModelStatus> {
        let mut catalog = Vec::with_capacity(self.adapters.len());
        for (model, adapter) in &self.adapters {
            catalog.push(ModelStatus {
                model: model.clone(),
                provider: adapter.provider_name().to_string(),
                healthy: self.is_healthy(model).await,
                info: adapter.model_info(),
            });
        }
        catalog.sort_by(|a, b| a.model.cmp(&b.model));
        catalog
    }

    pub fn routing_stats(&self) -> RoutingStats {
        RoutingStats {
            total_models: self.adapters.len(),
            healthy_models: self
                .health_cache
                .iter()
                .filter(|entry| *entry.value())
                .count(),
            supported_tasks: TASK_ROUTES.iter().map(|(tag, ..)| tag.to_string()).collect(),
            model_providers: self
                .adapters
                .iter()
                .map(|(model, adapter)| (model.clone(), adapter.provider_name().to_string()))
                .collect(),
        }
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }
}
