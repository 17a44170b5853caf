use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: String,
}

/// One streamed increment; `done` marks the final frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    pub delta: String,
    pub done: bool,
}

/// Static facts an adapter reports about its model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub supports_streaming: bool,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub strengths: Vec<String>,
}

/// A routed completion request as the API surface sees it.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub task_type: String,
    /// "auto" or a concrete model id.
    pub model_preference: String,
    pub options: ChatOptions,
    pub user_id: Option<String>,
    pub use_prompt_template: bool,
    pub language: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, task_type: impl Into<String>) -> Self {
        Self {
            messages,
            task_type: task_type.into(),
            model_preference: "auto".to_string(),
            options: ChatOptions::default(),
            user_id: None,
            use_prompt_template: false,
            language: None,
        }
    }
}

/// Rough token estimate used where the provider does not report usage:
/// ~4 chars per token for ASCII, CJK roughly one token per character.
pub fn estimate_tokens(text: &str) -> u32 {
    let mut ascii = 0u32;
    let mut cjk = 0u32;
    for c in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            cjk += 1;
        } else {
            ascii += 1;
        }
    }
    cjk + ascii.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_weights_cjk_heavier() {
        let ascii = estimate_tokens("hello world!");
        assert_eq!(ascii, 3);
        let mixed = estimate_tokens("平安银行 rally");
        assert!(mixed > estimate_tokens(" rally"));
    }
}
