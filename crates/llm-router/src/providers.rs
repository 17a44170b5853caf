use std::time::Duration;

use async_trait::async_trait;
use council_core::{CouncilError, CouncilResult};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;

use crate::adapter::LlmAdapter;
use crate::openai_compat::OpenAiCompatClient;
use crate::sse::sse_json_stream;
use crate::types::{ChatCompletion, ChatMessage, ChatOptions, ModelInfo, StreamDelta, TokenUsage};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Static model facts: (model, max_tokens, $/1k input, $/1k output, strengths).
type ModelFacts = (&'static str, u32, f64, f64, &'static [&'static str]);

const MODEL_FACTS: &[ModelFacts] = &[
    ("deepseek-chat", 4096, 0.0014, 0.0028, &["reasoning", "financial analysis", "chinese"]),
    ("deepseek-coder", 4096, 0.0014, 0.0028, &["code", "data extraction"]),
    ("gpt-4", 8192, 0.03, 0.06, &["tool calling", "reasoning", "data extraction"]),
    ("gpt-3.5-turbo", 4096, 0.0015, 0.002, &["general", "fast"]),
    ("qwen-plus", 8192, 0.004, 0.012, &["chinese", "financial analysis"]),
    ("qwen-turbo", 8192, 0.0008, 0.002, &["chinese", "fast"]),
    ("gemini-pro", 8192, 0.0005, 0.0015, &["reasoning", "long context"]),
    ("gemini-1.5-flash", 8192, 0.000075, 0.0003, &["fast", "general"]),
];

pub fn model_facts(model: &str) -> Option<&'static ModelFacts> {
    MODEL_FACTS.iter().find(|(name, ..)| *name == model)
}

fn info_for(provider: &str, model: &str) -> ModelInfo {
    let (max_tokens, input, output, strengths) = model_facts(model)
        .map(|(_, max, i, o, s)| (*max, *i, *o, *s))
        .unwrap_or((4096, 0.0, 0.0, &[] as &[&str]));
    ModelInfo {
        provider: provider.to_string(),
        model: model.to_string(),
        max_tokens,
        supports_streaming: true,
        cost_per_1k_input: input,
        cost_per_1k_output: output,
        strengths: strengths.iter().map(|s| s.to_string()).collect(),
    }
}

/// Adapter for any provider speaking the OpenAI chat protocol.
pub struct OpenAiCompatAdapter {
    provider: &'static str,
    model: String,
    client: OpenAiCompatClient,
}

impl OpenAiCompatAdapter {
    pub fn deepseek(model: &str, api_key: String) -> Self {
        Self {
            provider: "deepseek",
            model: model.to_string(),
            client: OpenAiCompatClient::new(api_key, DEEPSEEK_BASE_URL),
        }
    }

    pub fn openai(model: &str, api_key: String) -> Self {
        Self {
            provider: "openai",
            model: model.to_string(),
            client: OpenAiCompatClient::new(api_key, OPENAI_BASE_URL),
        }
    }

    pub fn dashscope(model: &str, api_key: String) -> Self {
        Self {
            provider: "dashscope",
            model: model.to_string(),
            client: OpenAiCompatClient::new(api_key, DASHSCOPE_BASE_URL),
        }
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        self.provider
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<ChatCompletion> {
        self.client
            .chat(self.provider, &self.model, messages, options)
            .await
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<BoxStream<'static, CouncilResult<StreamDelta>>> {
        self.client
            .chat_stream(self.provider, &self.model, messages, options)
            .await
    }

    async fn health_check(&self) -> bool {
        self.client.has_credentials()
    }

    fn model_info(&self) -> ModelInfo {
        info_for(self.provider, &self.model)
    }
}

/// Google Gemini adapter. A different wire shape: role/parts content
/// blocks, usage in `usageMetadata`, SSE via `alt=sse`.
pub struct GoogleAdapter {
    model: String,
    api_key: String,
    client: Client,
    base_url: String,
}

impl GoogleAdapter {
    pub fn new(model: &str, api_key: String) -> Self {
        Self {
            model: model.to_string(),
            api_key,
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: GOOGLE_BASE_URL.to_string(),
        }
    }

    fn wire_model(&self) -> &str {
        // The catalog name "gemini-pro" maps onto the current 1.5 API id.
        match self.model.as_str() {
            "gemini-pro" => "gemini-1.5-pro",
            other => other,
        }
    }

    fn contents(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system = None;
        let mut contents = Vec::new();
        for message in messages {
            match message.role.as_str() {
                "system" => system = Some(message.content.clone()),
                "assistant" => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": message.content }],
                })),
                _ => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": message.content }],
                })),
            }
        }
        (system, contents)
    }

    fn body(messages: &[ChatMessage], options: &ChatOptions) -> serde_json::Value {
        let (system, contents) = Self::contents(messages);
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": options.max_tokens,
                "temperature": options.temperature,
            },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    fn extract_text(value: &serde_json::Value) -> String {
        value
            .pointer("/candidates/0/content/parts")
            .and_then(|parts| parts.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn extract_usage(value: &serde_json::Value) -> Option<TokenUsage> {
        let meta = value.get("usageMetadata")?;
        Some(TokenUsage {
            prompt_tokens: meta.get("promptTokenCount")?.as_u64()? as u32,
            completion_tokens: meta
                .get("candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: meta
                .get("totalTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        })
    }

    async fn send(
        &self,
        method: &str,
        query: &str,
        body: &serde_json::Value,
    ) -> CouncilResult<reqwest::Response> {
        let url = format!(
            "{}/models/{}:{method}?key={}{query}",
            self.base_url,
            self.wire_model(),
            self.api_key
        );
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                CouncilError::Timeout("google: completion timed out".to_string())
            } else {
                CouncilError::Unavailable(format!("google: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                400 | 401 | 403 => CouncilError::Auth("google: credentials rejected".to_string()),
                429 => CouncilError::RateLimited("google: throttled".to_string()),
                _ => CouncilError::Unavailable(format!("google: HTTP {status}")),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmAdapter for GoogleAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "google"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<ChatCompletion> {
        let body = Self::body(messages, options);
        let response = self.send("generateContent", "", &body).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CouncilError::Unavailable(format!("google: bad payload: {e}")))?;

        let content = Self::extract_text(&value);
        if content.is_empty() {
            return Err(CouncilError::Unavailable(
                "google: empty completion".to_string(),
            ));
        }

        let usage = Self::extract_usage(&value).unwrap_or_else(|| {
            let prompt: u32 = messages
                .iter()
                .map(|m| crate::types::estimate_tokens(&m.content))
                .sum();
            let completion = crate::types::estimate_tokens(&content);
            TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(ChatCompletion {
            content,
            usage,
            model: self.model.clone(),
            provider: "google".to_string(),
        })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<BoxStream<'static, CouncilResult<StreamDelta>>> {
        let body = Self::body(messages, options);
        let response = self
            .send("streamGenerateContent", "&alt=sse", &body)
            .await?;

        let stream = sse_json_stream(response)
            .map(|chunk| {
                chunk.map(|value| {
                    let delta = GoogleAdapter::extract_text(&value);
                    let done = value
                        .pointer("/candidates/0/finishReason")
                        .map(|v| !v.is_null())
                        .unwrap_or(false);
                    StreamDelta { delta, done }
                })
            })
            .boxed();

        Ok(stream)
    }

    async fn health_check(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn model_info(&self) -> ModelInfo {
        info_for("google", &self.model)
    }
}
