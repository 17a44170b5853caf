use async_trait::async_trait;
use council_core::CouncilResult;
use futures_util::stream::BoxStream;

use crate::types::{ChatCompletion, ChatMessage, ChatOptions, ModelInfo, StreamDelta};

/// Provider adapter contract. One instance per model id; the router owns
/// a registry of these and picks per task.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<ChatCompletion>;

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> CouncilResult<BoxStream<'static, CouncilResult<StreamDelta>>>;

    /// Local token estimate for budgeting; exact counts come back in
    /// provider usage.
    fn estimate_tokens(&self, text: &str) -> u32 {
        crate::types::estimate_tokens(text)
    }

    /// Cheap health signal. Configuration-only checks are expected here;
    /// probing the paid API on every sweep would burn quota.
    async fn health_check(&self) -> bool;

    fn model_info(&self) -> ModelInfo;
}
