//! Reference value endpoints.
//!
//! Reference values are externally observed CTL/ATL or weight readings. Rows
//! are append-only; deleting one appends a tombstone.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_date_param;
use crate::services::analytics::SharedAnalytics;
use crate::services::references::{ReferenceMetric, ResolvedReference, UnknownMetric};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReferenceQuery {
    /// Only values for this date (YYYY-MM-DD); all live values when omitted
    pub date: Option<String>,
}

/// Body of a reference value write.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReferenceWrite {
    /// Date the value was observed (YYYY-MM-DD)
    pub date: String,
    /// One of "ctl", "atl", "weight"
    pub metric: String,
    pub value: f64,
}

fn parse_metric(raw: &str) -> Result<ReferenceMetric, AppError> {
    raw.parse()
        .map_err(|e: UnknownMetric| AppError::BadRequest(e.to_string()))
}

/// List live reference values.
#[utoipa::path(
    get,
    path = "/api/v1/reference-values",
    tag = "Reference values",
    params(ReferenceQuery),
    responses(
        (status = 200, description = "Live reference values", body = Vec<ResolvedReference>),
        (status = 400, description = "Invalid date", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn list_reference_values(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<ReferenceQuery>,
) -> Result<Json<Vec<ResolvedReference>>, AppError> {
    let date = match params.date.as_deref() {
        Some(raw) => Some(parse_date_param(Some(raw))?),
        None => None,
    };
    Ok(Json(analytics.reference_values(date).await?))
}

/// Write a reference value; the latest write for a (date, metric) wins.
#[utoipa::path(
    post,
    path = "/api/v1/reference-values",
    tag = "Reference values",
    request_body = ReferenceWrite,
    responses(
        (status = 201, description = "Value stored", body = ResolvedReference),
        (status = 400, description = "Unknown metric or invalid value", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn write_reference_value(
    State(analytics): State<SharedAnalytics>,
    Json(body): Json<ReferenceWrite>,
) -> Result<(StatusCode, Json<ResolvedReference>), AppError> {
    let date = parse_date_param(Some(&body.date))?;
    let metric = parse_metric(&body.metric)?;
    let stored = analytics
        .write_reference_value(date, metric, body.value)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Delete a reference value. Deleting an absent value is not an error.
#[utoipa::path(
    delete,
    path = "/api/v1/reference-values/{date}/{metric}",
    tag = "Reference values",
    params(
        ("date" = String, Path, description = "Date of the value (YYYY-MM-DD)"),
        ("metric" = String, Path, description = "ctl, atl or weight"),
    ),
    responses(
        (status = 204, description = "Value deleted"),
        (status = 400, description = "Unknown metric or invalid date", body = ErrorResponse),
        (status = 503, description = "Load store unavailable", body = ErrorResponse),
    )
)]
pub async fn delete_reference_value(
    State(analytics): State<SharedAnalytics>,
    Path((date, metric)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let date = parse_date_param(Some(&date))?;
    let metric = parse_metric(&metric)?;
    analytics.delete_reference_value(date, metric).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analytics::{Analytics, AnalyticsConfig};
    use crate::services::store::fake::FakeStore;
    use std::sync::Arc;

    fn state() -> SharedAnalytics {
        Arc::new(Analytics::new(
            Arc::new(FakeStore::default()),
            AnalyticsConfig::default(),
        ))
    }

    fn write(date: &str, metric: &str, value: f64) -> Json<ReferenceWrite> {
        Json(ReferenceWrite {
            date: date.to_string(),
            metric: metric.to_string(),
            value,
        })
    }

    #[tokio::test]
    async fn test_write_list_delete() {
        let state = state();
        let (status, Json(stored)) =
            write_reference_value(State(state.clone()), write("2026-03-01", "CTL", 52.0))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(stored.metric, ReferenceMetric::Ctl);

        let Json(listed) = list_reference_values(
            State(state.clone()),
            Query(ReferenceQuery {
                date: Some("2026-03-01".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(listed.len(), 1);

        let status = delete_reference_value(
            State(state.clone()),
            Path(("2026-03-01".to_string(), "ctl".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(listed) = list_reference_values(State(state), Query(ReferenceQuery { date: None }))
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_metric_is_bad_request() {
        let result = write_reference_value(State(state()), write("2026-03-01", "vo2max", 55.0)).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let result = delete_reference_value(
            State(state()),
            Path(("2026-03-01".to_string(), "ftp".to_string())),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
