//! Recovery endpoints.
//!
//! GET /api/v1/health/history: per-day HRV, resting HR, sleep and recovery
//! GET /api/v1/trends: direction and weekly averages of the same window
//! GET /api/v1/recommendations/today: training intensity for a day

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_date_param;
use crate::services::analytics::SharedAnalytics;
use crate::services::wellness::{HealthHistory, HealthTrends, Recommendation};

pub const DEFAULT_HISTORY_DAYS: i64 = 30;
pub const MAX_HISTORY_DAYS: i64 = 366;

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Last day of the window (YYYY-MM-DD), defaults to today
    pub date: Option<String>,
    /// Window length in days, defaults to 30
    pub days: Option<i64>,
}

impl HistoryQuery {
    fn resolve(&self) -> Result<(chrono::NaiveDate, i64), AppError> {
        let date = parse_date_param(self.date.as_deref())?;
        let days = self.days.unwrap_or(DEFAULT_HISTORY_DAYS);
        if !(1..=MAX_HISTORY_DAYS).contains(&days) {
            return Err(AppError::BadRequest(format!(
                "days must be between 1 and {}",
                MAX_HISTORY_DAYS
            )));
        }
        Ok((date, days))
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DayQuery {
    /// Day to plan (YYYY-MM-DD), defaults to today
    pub date: Option<String>,
}

/// Get the per-day health series for a window.
///
/// Only recorded days appear; each metric is null where that day lacks it.
#[utoipa::path(
    get,
    path = "/api/v1/health/history",
    tag = "Recovery",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Health series", body = HealthHistory),
        (status = 400, description = "Invalid date or window", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_health_history(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HealthHistory>, AppError> {
    let (date, days) = params.resolve()?;
    let history = analytics.health_history(date, days).await?;
    Ok(Json(history.as_ref().clone()))
}

/// Get HRV and resting-HR trends with weekly averages.
#[utoipa::path(
    get,
    path = "/api/v1/trends",
    tag = "Recovery",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Trends over the window", body = HealthTrends),
        (status = 400, description = "Invalid date or window", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_trends(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HealthTrends>, AppError> {
    let (date, days) = params.resolve()?;
    Ok(Json(analytics.health_trends(date, days).await?))
}

/// Get the training recommendation for a day.
///
/// Scores recovery from the day's HRV, sleep and resting HR plus the ATL/CTL
/// ratio, then maps the score to an intensity tier.
#[utoipa::path(
    get,
    path = "/api/v1/recommendations/today",
    tag = "Recovery",
    params(DayQuery),
    responses(
        (status = 200, description = "Recommendation", body = Recommendation),
        (status = 400, description = "Invalid date", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_recommendation(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<DayQuery>,
) -> Result<Json<Recommendation>, AppError> {
    let date = parse_date_param(params.date.as_deref())?;
    Ok(Json(analytics.recommendation(date).await?))
}
