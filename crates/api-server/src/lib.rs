use std::sync::Arc;
use std::time::Duration;

use analysis_graph::{AgentInvoker, AnalysisGraph, CompletionProvider};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use council_core::{CouncilError, Settings};
use data_federation::{DataFederation, ProfileManager};
use data_sources::SourceRegistry;
use execution_monitor::{ExecutionMonitor, Thresholds};
use llm_router::{ModelRouter, UsageTracker};
use load_balancer::{LoadBalancer, Strategy};
use memory_client::MemoryClient;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use tiered_cache::TieredCache;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use workflow_scheduler::{SchedulerConfig, TaskExecutor, WorkflowScheduler};

mod analysis_routes;
mod concurrency;
mod data_routes;
mod executors;
mod llm_routes;
mod workflow_routes;

pub use concurrency::{AnalysisPool, PoolStats};
pub use executors::{AnalysisExecutor, CachedDataProvider};

/// Shared handles injected into every route handler. Built once in
/// `run_server`; no module-level mutable state anywhere.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub scheduler: Arc<WorkflowScheduler>,
    pub monitor: Arc<ExecutionMonitor>,
    pub llm: Arc<ModelRouter>,
    pub cache: Arc<TieredCache>,
    pub federation: Arc<DataFederation>,
    pub memory: Arc<MemoryClient>,
    pub pool: Arc<AnalysisPool>,
    pub graph: Arc<AnalysisGraph>,
    pub balancer: Arc<LoadBalancer>,
}

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Route-level error: the council taxonomy mapped onto HTTP statuses.
#[derive(Debug)]
pub struct AppError(pub CouncilError);

impl From<CouncilError> for AppError {
    fn from(err: CouncilError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self(CouncilError::Internal(err.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self.0 {
            CouncilError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            CouncilError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            CouncilError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, Some(30)),
            CouncilError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, None),
            CouncilError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, Some(60)),
            CouncilError::Auth(_) => (StatusCode::SERVICE_UNAVAILABLE, Some(300)),
            CouncilError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error on request path");
        }

        let body = Json(ApiResponse::<()>::error(self.0.to_string()));
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        analysis_routes::submit_analysis,
        analysis_routes::run_analysis,
        analysis_routes::analysis_status,
        analysis_routes::cancel_analysis,
        workflow_routes::list_tasks,
        workflow_routes::scheduler_metrics,
        workflow_routes::system_metrics,
        workflow_routes::performance_metrics,
        workflow_routes::list_alerts,
        workflow_routes::scheduler_lifecycle,
        llm_routes::list_models,
        llm_routes::chat_completions,
        llm_routes::usage_stats,
        data_routes::fetch_data,
        data_routes::list_sources,
        data_routes::list_profiles,
        data_routes::switch_profile,
    ),
    tags(
        (name = "Analysis", description = "Submit and track analysis tasks"),
        (name = "Workflow", description = "Scheduler metrics and lifecycle"),
        (name = "LLM", description = "Routed completions and usage"),
        (name = "Data", description = "Federated market data")
    )
)]
struct ApiDoc;

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    scheduler_running: bool,
    hot_tier: bool,
    memory_service: bool,
    data_sources: usize,
    llm_models: usize,
    pool: PoolStats,
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthReport> {
    let catalog = state.llm.model_catalog().await;
    Json(HealthReport {
        status: "healthy",
        scheduler_running: state.scheduler.is_running(),
        hot_tier: state.settings.redis_url.is_some(),
        memory_service: state.memory.health_check().await,
        data_sources: state.federation.source_stats().len(),
        llm_models: catalog.len(),
        pool: state.pool.stats(),
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(analysis_routes::routes())
        .merge(workflow_routes::routes())
        .merge(llm_routes::routes())
        .merge(data_routes::routes())
        .route("/health", get(health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Composition root: construct every manager, wire the seams, serve.
pub async fn run_server() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::from_env());

    // Durable tier.
    sqlx::any::install_default_drivers();
    let db = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    tiered_cache::init_schema(&db).await?;

    // Hot tier is optional; absence degrades reads to the durable tier.
    let hot = match &settings.redis_url {
        Some(url) => match redis::Client::open(url.as_str()) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(manager) => Some(manager),
                Err(err) => {
                    tracing::warn!(error = %err, "redis unreachable, hot tier disabled");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "invalid REDIS_URL, hot tier disabled");
                None
            }
        },
        None => None,
    };

    // Data plane.
    let registry = Arc::new(SourceRegistry::from_env());
    let profiles = match &settings.priority_config_path {
        Some(path) => Arc::new(ProfileManager::load(std::path::Path::new(path))?),
        None => Arc::new(ProfileManager::with_defaults()),
    };
    let federation = Arc::new(DataFederation::new(Arc::clone(&registry), profiles));
    Arc::clone(&federation).spawn_health_sweep();
    let cache = Arc::new(TieredCache::new(hot.clone(), db, Arc::clone(&federation)));
    Arc::clone(&cache).spawn_cleanup_sweep();

    // LLM plane.
    let usage = Arc::new(UsageTracker::new(hot));
    let llm = Arc::new(ModelRouter::from_env(usage));
    llm.refresh_health().await;

    // Memory and the agent graph.
    let memory = Arc::new(MemoryClient::new(settings.memory_service_url.clone()));
    let invoker = AgentInvoker::new(Arc::clone(&llm) as Arc<dyn CompletionProvider>, Arc::clone(&memory));
    let graph = Arc::new(AnalysisGraph::new(
        invoker,
        Arc::new(CachedDataProvider::new(Arc::clone(&cache))),
    ));

    // Control plane.
    let scheduler = WorkflowScheduler::new(SchedulerConfig {
        max_concurrent: settings.max_concurrent_workflows,
        max_queue_size: settings.max_queue_size,
        default_timeout: settings.analysis_timeout,
        default_max_retries: settings.max_tool_retries,
    });
    let executor = AnalysisExecutor::new(Arc::clone(&graph));
    for kind in AnalysisExecutor::KINDS {
        scheduler.register_executor(kind, Arc::clone(&executor) as Arc<dyn TaskExecutor>);
    }
    let monitor = ExecutionMonitor::new(Arc::clone(&scheduler), Thresholds::default());
    scheduler.start();
    Arc::clone(&monitor).spawn();

    let pool = AnalysisPool::new(settings.max_concurrent_analyses, settings.max_queue_size);

    // Optional worker fleet for the balancer, "host:port,host:port".
    let balancer = LoadBalancer::new(Strategy::HealthAware);
    if let Ok(raw) = std::env::var("WORKER_INSTANCES") {
        for (index, entry) in raw.split(',').filter(|e| !e.is_empty()).enumerate() {
            if let Some((host, port)) = entry.trim().rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    balancer.add_instance(&format!("worker-{index}"), host, port, 1);
                } else {
                    tracing::warn!(entry, "ignoring malformed worker instance");
                }
            }
        }
        if !balancer.instances().is_empty() {
            Arc::clone(&balancer).spawn_health_checks();
        }
    }

    let state = AppState {
        settings: Arc::clone(&settings),
        scheduler: Arc::clone(&scheduler),
        monitor,
        llm,
        cache,
        federation,
        memory,
        pool,
        graph,
        balancer,
    };

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "api server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    scheduler.stop(Duration::from_secs(30)).await;
    Ok(())
}
