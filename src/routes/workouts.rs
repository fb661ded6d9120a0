//! Workout endpoints.
//!
//! GET  /api/v1/workouts: served from the workout index; see
//!      `services::workout_index` for the cold-start policy.
//! POST /api/v1/workouts: record an activity and invalidate derived caches.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_date;
use crate::services::analytics::SharedAnalytics;
use crate::services::records::WorkoutRecord;
use crate::services::workout_index::{ColdPolicy, WorkoutQuery};

/// Upper bound on `limit`.
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WorkoutsQuery {
    /// Only workouts on this date (YYYY-MM-DD)
    pub date: Option<String>,
    /// Only workouts on or before this date (YYYY-MM-DD)
    pub before: Option<String>,
    /// Maximum number of workouts, most recent first
    pub limit: Option<usize>,
    /// What to do while the index is still loading: "direct" (default) or "retry"
    pub fallback: Option<ColdPolicy>,
}

impl WorkoutsQuery {
    fn to_query(&self) -> Result<WorkoutQuery, AppError> {
        if self.limit.is_some_and(|l| l == 0 || l > MAX_LIMIT) {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        Ok(WorkoutQuery {
            filter_date: self.date.as_deref().map(parse_date).transpose()?,
            before: self.before.as_deref().map(parse_date).transpose()?,
            limit: self.limit,
        })
    }
}

/// List workouts, most recent first.
///
/// With `fallback=retry`, a request that finds the index still loading after
/// the load ceiling gets a 503 with `Retry-After` instead of an unindexed query.
#[utoipa::path(
    get,
    path = "/api/v1/workouts",
    tag = "Workouts",
    params(WorkoutsQuery),
    responses(
        (status = 200, description = "Matching workouts, most recent first", body = Vec<WorkoutRecord>),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 503, description = "Load store unavailable or index still loading", body = ErrorResponse),
    )
)]
pub async fn list_workouts(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<WorkoutsQuery>,
) -> Result<Json<Vec<WorkoutRecord>>, AppError> {
    let query = params.to_query()?;
    let workouts = analytics
        .workouts(&query, params.fallback.unwrap_or_default())
        .await?;
    Ok(Json(workouts))
}

/// Record a new workout.
#[utoipa::path(
    post,
    path = "/api/v1/workouts",
    tag = "Workouts",
    request_body = WorkoutRecord,
    responses(
        (status = 201, description = "Workout recorded", body = WorkoutRecord),
        (status = 400, description = "Invalid workout", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn create_workout(
    State(analytics): State<SharedAnalytics>,
    Json(workout): Json<WorkoutRecord>,
) -> Result<(StatusCode, Json<WorkoutRecord>), AppError> {
    analytics.record_workout(workout.clone()).await?;
    Ok((StatusCode::CREATED, Json(workout)))
}
