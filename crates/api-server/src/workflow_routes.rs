use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use council_core::{CouncilError, TaskStatus};
use execution_monitor::{Alert, PerformanceMetrics, SystemMetrics};
use serde::Deserialize;
use workflow_scheduler::{TaskSnapshot, WorkflowMetrics};

use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TaskListQuery {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AlertQuery {
    #[serde(default)]
    pub active_only: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workflow/tasks", get(list_tasks))
        .route("/workflow/metrics/scheduler", get(scheduler_metrics))
        .route("/workflow/metrics/system", get(system_metrics))
        .route("/workflow/metrics/performance", get(performance_metrics))
        .route("/workflow/alerts", get(list_alerts))
        .route("/workflow/scheduler/:action", post(scheduler_lifecycle))
}

#[utoipa::path(
    get,
    path = "/workflow/tasks",
    params(
        ("symbol" = Option<String>, Query, description = "Filter by symbol"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<usize>, Query, description = "Max results, capped at 200")
    ),
    responses((status = 200, description = "Task snapshots, newest first")),
    tag = "Workflow"
)]
pub(crate) async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<ApiResponse<Vec<TaskSnapshot>>>, AppError> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| CouncilError::Validation(format!("invalid status: {raw}")))?,
        ),
    };
    let tasks = state
        .scheduler
        .list(query.symbol.as_deref(), status, query.limit.min(200));
    Ok(Json(ApiResponse::success(tasks)))
}

#[utoipa::path(
    get,
    path = "/workflow/metrics/scheduler",
    responses((status = 200, description = "Scheduler counters and success rate")),
    tag = "Workflow"
)]
pub(crate) async fn scheduler_metrics(
    State(state): State<AppState>,
) -> Json<ApiResponse<WorkflowMetrics>> {
    Json(ApiResponse::success(state.scheduler.metrics()))
}

#[utoipa::path(
    get,
    path = "/workflow/metrics/system",
    responses((status = 200, description = "Latest host metrics sample")),
    tag = "Workflow"
)]
pub(crate) async fn system_metrics(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SystemMetrics>>, AppError> {
    let metrics = state.monitor.latest_system_metrics().ok_or_else(|| {
        CouncilError::Unavailable("no system metrics collected yet".to_string())
    })?;
    Ok(Json(ApiResponse::success(metrics)))
}

#[utoipa::path(
    get,
    path = "/workflow/metrics/performance",
    responses((status = 200, description = "Latest derived performance sample")),
    tag = "Workflow"
)]
pub(crate) async fn performance_metrics(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PerformanceMetrics>>, AppError> {
    let metrics = state.monitor.latest_performance_metrics().ok_or_else(|| {
        CouncilError::Unavailable("no performance metrics collected yet".to_string())
    })?;
    Ok(Json(ApiResponse::success(metrics)))
}

#[utoipa::path(
    get,
    path = "/workflow/alerts",
    params(("active_only" = Option<bool>, Query, description = "Only unresolved alerts")),
    responses((status = 200, description = "Alert list, newest first")),
    tag = "Workflow"
)]
pub(crate) async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Json<ApiResponse<Vec<Alert>>> {
    Json(ApiResponse::success(state.monitor.alerts(query.active_only)))
}

#[utoipa::path(
    post,
    path = "/workflow/scheduler/{action}",
    params(("action" = String, Path, description = "start or stop")),
    responses(
        (status = 200, description = "Lifecycle applied"),
        (status = 400, description = "Unknown action")
    ),
    tag = "Workflow"
)]
pub(crate) async fn scheduler_lifecycle(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<Json<ApiResponse<&'static str>>, AppError> {
    match action.as_str() {
        "start" => {
            state.scheduler.start();
            Ok(Json(ApiResponse::success("started")))
        }
        "stop" => {
            state
                .scheduler
                .stop(std::time::Duration::from_secs(30))
                .await;
            Ok(Json(ApiResponse::success("stopped")))
        }
        other => {
            Err(CouncilError::Validation(format!("unknown lifecycle action: {other}")).into())
        }
    }
}
