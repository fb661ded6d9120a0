//! Cache administration endpoints.
//!
//! GET  /api/v1/cache/status: workout index state and cache sizes
//! POST /api/v1/cache/clear: drop every cache; the next reads repopulate

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::analytics::SharedAnalytics;
use crate::services::workout_index::IndexStatus;

#[derive(Debug, Serialize, ToSchema)]
pub struct CacheStatus {
    pub workout_index: IndexStatus,
    /// Cached PMC reports
    pub pmc_entries: usize,
    /// Cached dashboard snapshots
    pub dashboard_entries: usize,
    /// Cached health history windows
    pub health_history_entries: usize,
}

/// Get the workout index state and cache sizes.
#[utoipa::path(
    get,
    path = "/api/v1/cache/status",
    tag = "Cache",
    responses(
        (status = 200, description = "Current cache status", body = CacheStatus),
    )
)]
pub async fn get_cache_status(State(analytics): State<SharedAnalytics>) -> Json<CacheStatus> {
    let (pmc_entries, dashboard_entries) = analytics.cache_sizes().await;
    Json(CacheStatus {
        workout_index: analytics.index_status().await,
        pmc_entries,
        dashboard_entries,
        health_history_entries: analytics.cached_health_histories().await,
    })
}

/// Clear every cache and the workout index.
#[utoipa::path(
    post,
    path = "/api/v1/cache/clear",
    tag = "Cache",
    responses(
        (status = 204, description = "Caches cleared"),
    )
)]
pub async fn clear_caches(State(analytics): State<SharedAnalytics>) -> StatusCode {
    analytics.clear_caches().await;
    tracing::info!("Cache: cleared on request");
    StatusCode::NO_CONTENT
}
