//! Calibration endpoints.
//!
//! GET  /api/v1/calibration: parameters currently in use
//! POST /api/v1/calibration/run: fit parameters to the stored reference values

use axum::extract::State;
use axum::Json;

use crate::errors::{AppError, ErrorResponse};
use crate::services::analytics::SharedAnalytics;
use crate::services::calibration::{CalibrationOutcome, CalibrationParameters};

/// Get the active calibration parameters.
#[utoipa::path(
    get,
    path = "/api/v1/calibration",
    tag = "Calibration",
    responses(
        (status = 200, description = "Active parameters", body = CalibrationParameters),
    )
)]
pub async fn get_calibration(
    State(analytics): State<SharedAnalytics>,
) -> Json<CalibrationParameters> {
    let params = analytics.calibration_parameters().await;
    Json(params.as_ref().clone())
}

/// Run a calibration pass.
///
/// Returns `insufficient_references` without touching the parameters when
/// fewer than two usable reference points exist. Parameters only change when
/// the fit improves and moves at least one value past its threshold.
#[utoipa::path(
    post,
    path = "/api/v1/calibration/run",
    tag = "Calibration",
    responses(
        (status = 200, description = "Calibration outcome", body = CalibrationOutcome),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn run_calibration(
    State(analytics): State<SharedAnalytics>,
) -> Result<Json<CalibrationOutcome>, AppError> {
    Ok(Json(analytics.run_calibration().await?))
}
