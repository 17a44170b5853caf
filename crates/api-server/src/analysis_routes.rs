use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use council_core::{
    AnalysisKind, AnalysisParameters, AnalysisRequest, CouncilError, MarketType, TaskPriority,
    TaskStatus,
};
use serde::{Deserialize, Serialize};
use workflow_scheduler::TaskSnapshot;

use analysis_graph::AnalysisOutcome;

use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitAnalysisRequest {
    pub symbol: String,
    pub market: String,
    /// YYYY-MM-DD; defaults to today.
    #[serde(default)]
    pub analysis_date: Option<NaiveDate>,
    pub kind: String,
    #[serde(default)]
    pub parameters: AnalysisParameters,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitQuery {
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmitAnalysisResponse {
    pub task_id: String,
    pub estimated_wait_seconds: u64,
}

impl SubmitAnalysisRequest {
    fn into_request(self, priority: TaskPriority) -> Result<AnalysisRequest, CouncilError> {
        let market = MarketType::parse(&self.market)
            .ok_or_else(|| CouncilError::Validation(format!("unknown market: {}", self.market)))?;
        let kind = AnalysisKind::parse(&self.kind)
            .ok_or_else(|| CouncilError::Validation(format!("unknown kind: {}", self.kind)))?;
        let request = AnalysisRequest {
            symbol: self.symbol,
            market,
            analysis_date: self
                .analysis_date
                .unwrap_or_else(|| chrono::Utc::now().date_naive()),
            kind,
            parameters: self.parameters,
            priority,
            timeout_seconds: self.timeout_seconds,
            dependencies: self.dependencies,
        };
        request.validate()?;
        Ok(request)
    }
}

fn task_kind(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::Debate => "debate",
        _ => "analysis",
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/analysis/submit", post(submit_analysis))
        .route("/analysis/run", post(run_analysis))
        .route("/analysis/status/:task_id", get(analysis_status))
        .route("/analysis/cancel/:task_id", delete(cancel_analysis))
}

#[utoipa::path(
    post,
    path = "/analysis/submit",
    request_body = SubmitAnalysisRequest,
    params(("priority" = Option<String>, Query, description = "low | normal | high | urgent")),
    responses((status = 200, description = "Task accepted", body = SubmitAnalysisResponse)),
    tag = "Analysis"
)]
pub(crate) async fn submit_analysis(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(body): Json<SubmitAnalysisRequest>,
) -> Result<Json<ApiResponse<SubmitAnalysisResponse>>, AppError> {
    let priority = match query.priority.as_deref() {
        None => TaskPriority::Normal,
        Some(raw) => TaskPriority::parse(raw)
            .ok_or_else(|| CouncilError::Validation(format!("invalid priority: {raw}")))?,
    };

    let request = body.into_request(priority)?;
    let kind = task_kind(request.kind);
    let task_id = state.scheduler.submit(kind, request)?;

    let metrics = state.scheduler.metrics();
    let per_task = if metrics.average_execution_secs > 0.0 {
        metrics.average_execution_secs
    } else {
        state.settings.analysis_timeout.as_secs_f64() / 2.0
    };
    let slots = state.settings.max_concurrent_workflows.max(1);
    let estimated_wait_seconds =
        (metrics.pending_tasks as f64 * per_task / slots as f64).round() as u64;

    Ok(Json(ApiResponse::success(SubmitAnalysisResponse {
        task_id,
        estimated_wait_seconds,
    })))
}

#[utoipa::path(
    post,
    path = "/analysis/run",
    request_body = SubmitAnalysisRequest,
    responses((status = 200, description = "Analysis outcome")),
    tag = "Analysis"
)]
pub(crate) async fn run_analysis(
    State(state): State<AppState>,
    Json(body): Json<SubmitAnalysisRequest>,
) -> Result<Json<ApiResponse<AnalysisOutcome>>, AppError> {
    let request = body.into_request(TaskPriority::Normal)?;
    let graph = state.graph.clone();
    let outcome = state
        .pool
        .run(async move { graph.run(&request).await })
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    get,
    path = "/analysis/status/{task_id}",
    responses(
        (status = 200, description = "Task snapshot"),
        (status = 404, description = "Unknown task")
    ),
    tag = "Analysis"
)]
pub(crate) async fn analysis_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskSnapshot>>, AppError> {
    let snapshot = state
        .scheduler
        .get(&task_id)
        .ok_or_else(|| CouncilError::NotFound(format!("task not found: {task_id}")))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

#[utoipa::path(
    delete,
    path = "/analysis/cancel/{task_id}",
    responses(
        (status = 200, description = "Cancelled"),
        (status = 400, description = "Task already terminal"),
        (status = 404, description = "Unknown task")
    ),
    tag = "Analysis"
)]
pub(crate) async fn cancel_analysis(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskSnapshot>>, AppError> {
    let snapshot = state
        .scheduler
        .get(&task_id)
        .ok_or_else(|| CouncilError::NotFound(format!("task not found: {task_id}")))?;

    if !state.scheduler.cancel(&task_id) {
        return Err(CouncilError::Validation(format!(
            "task {task_id} is already {}",
            snapshot.status.as_str()
        ))
        .into());
    }

    let snapshot = state
        .scheduler
        .get(&task_id)
        .ok_or_else(|| CouncilError::NotFound(format!("task not found: {task_id}")))?;
    debug_assert_eq!(snapshot.status, TaskStatus::Cancelled);
    Ok(Json(ApiResponse::success(snapshot)))
}
