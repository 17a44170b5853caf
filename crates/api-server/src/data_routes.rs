use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use council_core::{CouncilError, DataCategory, MarketType};
use data_sources::SourceStats;
use serde::{Deserialize, Serialize};
use tiered_cache::CachedEntry;

use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DataQuery {
    pub symbol: String,
    pub market: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProfileSummary {
    pub name: String,
    pub description: String,
    pub is_current: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SwitchProfileBody {
    pub name: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/data/sources", get(list_sources))
        .route("/data/profiles", get(list_profiles))
        .route("/data/profiles/current", post(switch_profile))
        .route("/data/:category", get(fetch_data))
}

#[utoipa::path(
    get,
    path = "/data/{category}",
    params(
        ("category" = String, Path, description = "basic_info | price_data | fundamentals | news | technical"),
        ("symbol" = String, Query, description = "Ticker symbol"),
        ("market" = String, Query, description = "cn_a | hk | us"),
        ("start_date" = Option<String>, Query, description = "YYYY-MM-DD"),
        ("end_date" = Option<String>, Query, description = "YYYY-MM-DD"),
        ("force_refresh" = Option<bool>, Query, description = "Bypass cache tiers")
    ),
    responses(
        (status = 200, description = "Cached or freshly federated data"),
        (status = 404, description = "No source produced data")
    ),
    tag = "Data"
)]
pub(crate) async fn fetch_data(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Json<ApiResponse<CachedEntry>>, AppError> {
    let category = DataCategory::parse(&category)
        .ok_or_else(|| CouncilError::Validation(format!("unknown category: {category}")))?;
    let market = MarketType::parse(&query.market)
        .ok_or_else(|| CouncilError::Validation(format!("unknown market: {}", query.market)))?;

    let end = query.end_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let start = query.start_date.unwrap_or(end - chrono::Duration::days(30));
    if start > end {
        return Err(
            CouncilError::Validation("start_date must not be after end_date".to_string()).into(),
        );
    }

    let entry = state
        .cache
        .get_data(
            &query.symbol,
            market,
            category,
            start,
            end,
            query.force_refresh,
        )
        .await?;
    Ok(Json(ApiResponse::success(entry)))
}

#[utoipa::path(
    get,
    path = "/data/sources",
    responses((status = 200, description = "Per-source status and counters")),
    tag = "Data"
)]
pub(crate) async fn list_sources(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<SourceStats>>> {
    Json(ApiResponse::success(state.federation.source_stats()))
}

#[utoipa::path(
    get,
    path = "/data/profiles",
    responses((status = 200, description = "Available priority profiles")),
    tag = "Data"
)]
pub(crate) async fn list_profiles(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ProfileSummary>>> {
    let manager = state.federation.profiles();
    let current = manager.current_profile();
    let profiles = manager
        .available_profiles()
        .into_iter()
        .map(|(name, description)| ProfileSummary {
            is_current: name == current,
            name,
            description,
        })
        .collect();
    Json(ApiResponse::success(profiles))
}

#[utoipa::path(
    post,
    path = "/data/profiles/current",
    request_body = SwitchProfileBody,
    responses(
        (status = 200, description = "Profile switched"),
        (status = 404, description = "Unknown profile")
    ),
    tag = "Data"
)]
pub(crate) async fn switch_profile(
    State(state): State<AppState>,
    Json(body): Json<SwitchProfileBody>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    state.federation.profiles().set_current(&body.name)?;
    Ok(Json(ApiResponse::success(body.name)))
}
