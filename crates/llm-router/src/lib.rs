mod adapter;
mod openai_compat;
mod prompts;
mod providers;
mod router;
mod sse;
mod types;
mod usage;

pub use adapter::LlmAdapter;
pub use openai_compat::OpenAiCompatClient;
pub use prompts::{PromptRegistry, PromptTemplate};
pub use providers::{model_facts, GoogleAdapter, OpenAiCompatAdapter};
pub use router::{ModelRouter, ModelStatus, RoutingStats};
pub use types::{
    estimate_tokens, ChatCompletion, ChatMessage, ChatOptions, CompletionRequest, ModelInfo,
    StreamDelta, TokenUsage,
};
pub use usage::{calculate_cost, AggregatedUsage, BucketUsage, UsageRecord, UsageTracker};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use council_core::{CouncilError, CouncilResult};
    use futures_util::stream::BoxStream;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Stub adapter with a fixed health flag and canned reply.
    struct StubAdapter {
        model: String,
        healthy: bool,
        calls: AtomicU32,
    }

    impl StubAdapter {
        fn new(model: &str, healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                model: model.to_string(),
                healthy,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmAdapter for StubAdapter {
        fn model_name(&self) -> &str {
            &self.model
        }

        fn provider_name(&self) -> &str {
            "stub"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> CouncilResult<ChatCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatCompletion {
                content: format!("{}:{}", self.model, messages.len()),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                model: self.model.clone(),
                provider: "stub".to_string(),
            })
        }

        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> CouncilResult<BoxStream<'static, CouncilResult<StreamDelta>>> {
            let frames = vec![
                Ok(StreamDelta {
                    delta: "partial".to_string(),
                    done: false,
                }),
                Ok(StreamDelta {
                    delta: String::new(),
                    done: true,
                }),
            ];
            Ok(futures_util::stream::iter(frames).boxed())
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "stub".to_string(),
                model: self.model.clone(),
                max_tokens: 4096,
                supports_streaming: true,
                cost_per_1k_input: 0.0,
                cost_per_1k_output: 0.0,
                strengths: vec![],
            }
        }
    }

    fn router_with(adapters: Vec<Arc<StubAdapter>>) -> ModelRouter {
        let mut router = ModelRouter::new(Arc::new(UsageTracker::new(None)));
        for adapter in adapters {
            router.register(adapter);
        }
        router
    }

    #[tokio::test]
    async fn pinned_healthy_model_wins() {
        let router = router_with(vec![
            StubAdapter::new("deepseek-chat", true),
            StubAdapter::new("gpt-4", true),
        ]);
        let model = router.route("reasoning", "gpt-4").await.unwrap();
        assert_eq!(model, "gpt-4");
    }

    #[tokio::test]
    async fn unhealthy_pin_falls_back_to_task_primary() {
        let router = router_with(vec![
            StubAdapter::new("deepseek-chat", true),
            StubAdapter::new("gpt-4", false),
        ]);
        let model = router.route("reasoning", "gpt-4").await.unwrap();
        assert_eq!(model, "deepseek-chat");
    }

    #[tokio::test]
    async fn primaries_then_fallbacks_then_any() {
        // tool_calling primaries are gpt-4/deepseek-chat/qwen-plus, all
        // absent or unhealthy here; gemini-pro is the first fallback.
        let router = router_with(vec![
            StubAdapter::new("gpt-4", false),
            StubAdapter::new("gemini-pro", true),
        ]);
        let model = router.route("tool_calling", "auto").await.unwrap();
        assert_eq!(model, "gemini-pro");

        // A model outside the task table is still better than failing.
        let router = router_with(vec![StubAdapter::new("custom-local", true)]);
        let model = router.route("tool_calling", "auto").await.unwrap();
        assert_eq!(model, "custom-local");
    }

    #[tokio::test]
    async fn no_healthy_model_is_unavailable() {
        let router = router_with(vec![StubAdapter::new("gpt-4", false)]);
        let err = router.route("general", "auto").await.unwrap_err();
        assert!(matches!(err, CouncilError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unknown_task_uses_general_route() {
        let router = router_with(vec![StubAdapter::new("deepseek-chat", true)]);
        let model = router.route("never_heard_of_it", "auto").await.unwrap();
        assert_eq!(model, "deepseek-chat");
    }

    #[tokio::test]
    async fn complete_dispatches_and_returns_content() {
        let adapter = StubAdapter::new("deepseek-chat", true);
        let router = router_with(vec![Arc::clone(&adapter)]);
        let request = CompletionRequest::new(
            vec![ChatMessage::user("analyze 000858")],
            "financial_analysis",
        );
        let completion = router.complete(&request).await.unwrap();
        assert_eq!(completion.model, "deepseek-chat");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(completion.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn prompt_template_expands_single_user_message() {
        let adapter = StubAdapter::new("deepseek-chat", true);
        let router = router_with(vec![Arc::clone(&adapter)]);
        let mut request = CompletionRequest::new(
            vec![ChatMessage::user("pe=28, rsi=61")],
            "financial_analysis",
        );
        request.use_prompt_template = true;
        let completion = router.complete(&request).await.unwrap();
        // The stub echoes the message count: system, one few-shot
        // user/assistant pair, then the templated user message.
        assert_eq!(completion.content, "deepseek-chat:4");

        // A task without curated examples templates to system + user.
        let mut request = CompletionRequest::new(
            vec![ChatMessage::user("pe=28, rsi=61")],
            "stock_analysis",
        );
        request.use_prompt_template = true;
        let completion = router.complete(&request).await.unwrap();
        assert_eq!(completion.content, "deepseek-chat:2");
    }

    #[tokio::test]
    async fn stream_yields_deltas_until_done() {
        let router = router_with(vec![StubAdapter::new("deepseek-chat", true)]);
        let request =
            CompletionRequest::new(vec![ChatMessage::user("stream it")], "general");
        let mut stream = router.complete_stream(&request).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.delta, "partial");
        assert!(!first.done);
        let last = stream.next().await.unwrap().unwrap();
        assert!(last.done);
        assert!(stream.next().await.is_none());
    }
}
