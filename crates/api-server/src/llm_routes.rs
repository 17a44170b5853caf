use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use council_core::CouncilError;
use futures_util::StreamExt;
use llm_router::{
    AggregatedUsage, ChatMessage, ChatOptions, CompletionRequest, ModelStatus,
};
use serde::Deserialize;

use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ChatCompletionBody {
    /// "auto" routes by task type; a concrete id pins the model.
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<ChatMessageBody>,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub use_prompt_template: bool,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ChatMessageBody {
    pub role: String,
    pub content: String,
}

fn default_model() -> String {
    "auto".to_string()
}

fn default_task_type() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UsageQuery {
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_days() -> i64 {
    7
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/llm/models", get(list_models))
        .route("/llm/chat/completions", post(chat_completions))
        .route("/llm/usage/stats", get(usage_stats))
}

#[utoipa::path(
    get,
    path = "/llm/models",
    responses((status = 200, description = "Registered models with health and facts")),
    tag = "LLM"
)]
pub(crate) async fn list_models(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ModelStatus>>> {
    Json(ApiResponse::success(state.llm.model_catalog().await))
}

#[utoipa::path(
    post,
    path = "/llm/chat/completions",
    request_body = ChatCompletionBody,
    responses(
        (status = 200, description = "Completion, or an SSE delta stream when stream=true"),
        (status = 503, description = "No available model")
    ),
    tag = "LLM"
)]
pub(crate) async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatCompletionBody>,
) -> Result<Response, AppError> {
    if body.messages.is_empty() {
        return Err(CouncilError::Validation("messages must not be empty".to_string()).into());
    }

    let defaults = &state.settings;
    let request = CompletionRequest {
        messages: body
            .messages
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect(),
        task_type: body.task_type,
        model_preference: if body.model.is_empty() {
            defaults
                .default_model
                .clone()
                .unwrap_or_else(|| "auto".to_string())
        } else {
            body.model
        },
        options: ChatOptions {
            max_tokens: body.max_tokens.unwrap_or(defaults.default_max_tokens),
            temperature: body.temperature.unwrap_or(defaults.default_temperature),
        },
        user_id: body.user_id,
        use_prompt_template: body.use_prompt_template,
        language: body.language,
    };

    if body.stream {
        let deltas = state.llm.complete_stream(&request).await?;
        let events = deltas.map(|delta| {
            let event = match delta {
                Ok(delta) => Event::default()
                    .json_data(&delta)
                    .unwrap_or_else(|_| Event::default().data("{}")),
                Err(err) => Event::default().event("error").data(err.to_string()),
            };
            Ok::<_, std::convert::Infallible>(event)
        });
        return Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response());
    }

    let completion = state.llm.complete(&request).await?;
    Ok(Json(ApiResponse::success(completion)).into_response())
}

#[utoipa::path(
    get,
    path = "/llm/usage/stats",
    params(
        ("days" = Option<i64>, Query, description = "Window in days, default 7"),
        ("user_id" = Option<String>, Query, description = "Scope to one user"),
        ("model" = Option<String>, Query, description = "Scope to one model")
    ),
    responses((status = 200, description = "Aggregated usage")),
    tag = "LLM"
)]
pub(crate) async fn usage_stats(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<ApiResponse<AggregatedUsage>>, AppError> {
    let stats = state
        .llm
        .usage()
        .stats(
            query.days.clamp(1, 30),
            query.user_id.as_deref(),
            query.model.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}
