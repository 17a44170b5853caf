use std::time::Duration;

use council_core::{CouncilError, CouncilResult};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::sse::sse_json_stream;
use crate::types::{ChatCompletion, ChatMessage, ChatOptions, StreamDelta, TokenUsage};

/// Wire client for the OpenAI chat-completions protocol, shared by every
/// provider that speaks it (OpenAI itself, DeepSeek, DashScope's
/// compatible mode).
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiCompatClient {
    pub fn new(api_key: String, base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> CouncilResult<reqwest::Response> {
        let body = WireRequest {
            model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CouncilError::Timeout(format!("{provider}: completion timed out"))
                } else {
                    CouncilError::Unavailable(format!("{provider}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => CouncilError::Auth(format!("{provider}: credentials rejected")),
                429 => CouncilError::RateLimited(format!("{provider}: throttled")),
                _ => CouncilError::Unavailable(format!("{provider}: HTTP {status}")),
            });
        }
        Ok(response)
    }

    pub async fn chat(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<ChatCompletion> {
        let response = self.send(provider, model, messages, options, false).await?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| CouncilError::Unavailable(format!("{provider}: bad payload: {e}")))?;

        let content = wire
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CouncilError::Unavailable(format!("{provider}: empty completion")))?;

        let usage = wire
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_else(|| {
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
            model: model.to_string(),
            provider: provider.to_string(),
        })
    }

    pub async fn chat_stream(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<BoxStream<'static, CouncilResult<StreamDelta>>> {
        let response = self.send(provider, model, messages, options, true).await?;

        let stream = sse_json_stream(response)
            .map(|chunk| {
                chunk.map(|value| {
                    let delta = value
                        .pointer("/choices/0/delta/content")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let done = value
                        .pointer("/choices/0/finish_reason")
                        .map(|v| !v.is_null())
                        .unwrap_or(false);
                    StreamDelta { delta, done }
                })
            })
            .boxed();

        Ok(stream)
    }
}
