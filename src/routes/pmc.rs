//! PMC endpoint.
//!
//! GET /api/v1/pmc: fitness (CTL), fatigue (ATL) and form (TSB) on a date,
//! plus the chart series for the trailing window.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_date_param;
use crate::services::analytics::SharedAnalytics;
use crate::services::performance::PmcReport;

/// Chart window used when `days` is omitted.
pub const DEFAULT_WINDOW_DAYS: i64 = 42;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WindowQuery {
    /// Target date (YYYY-MM-DD), defaults to today
    pub date: Option<String>,
    /// Trailing window in days, defaults to 42
    pub days: Option<i64>,
}

/// Get the performance management chart for a date.
///
/// Values are rounded to one decimal place. Served from a short-lived cache
/// keyed by (date, days); recording workouts, writing reference values and
/// calibration updates clear it.
#[utoipa::path(
    get,
    path = "/api/v1/pmc",
    tag = "PMC",
    params(WindowQuery),
    responses(
        (status = 200, description = "PMC values and chart series", body = PmcReport),
        (status = 400, description = "Invalid date or window", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_pmc(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<PmcReport>, AppError> {
    let date = parse_date_param(params.date.as_deref())?;
    let days = params.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let report = analytics.pmc(date, days).await?;
    Ok(Json(report.as_ref().clone()))
}
