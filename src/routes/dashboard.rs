//! Dashboard endpoint.
//!
//! GET /api/v1/dashboard: health, PMC, recent workouts, calories and weight
//! for one day. Each section is `{"ok": ...}` or `{"error": "..."}`, so one
//! failing source never hides the others.

use axum::extract::{Query, State};
use axum::Json;

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_date_param;
use crate::routes::pmc::{WindowQuery, DEFAULT_WINDOW_DAYS};
use crate::services::analytics::SharedAnalytics;
use crate::services::dashboard::DashboardSnapshot;
use crate::services::performance::MAX_WINDOW_DAYS;

/// Get the dashboard snapshot for a date.
#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    tag = "Dashboard",
    params(WindowQuery),
    responses(
        (status = 200, description = "Dashboard sections", body = DashboardSnapshot),
        (status = 400, description = "Invalid date or window", body = ErrorResponse),
    )
)]
pub async fn get_dashboard(
    State(analytics): State<SharedAnalytics>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let date = parse_date_param(params.date.as_deref())?;
    let days = params.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_WINDOW_DAYS
        )));
    }
    let snapshot = analytics.dashboard(date, days).await?;
    Ok(Json(snapshot.as_ref().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analytics::{Analytics, AnalyticsConfig};
    use crate::services::store::fake::FakeStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_store_outage_yields_error_sections_not_failure() {
        let store = Arc::new(FakeStore::default());
        store.fail("daily_calories");
        let state: SharedAnalytics = Arc::new(Analytics::new(store, AnalyticsConfig::default()));

        let Json(snapshot) = get_dashboard(
            State(state),
            Query(WindowQuery {
                date: Some("2026-03-01".to_string()),
                days: Some(7),
            }),
        )
        .await
        .unwrap();
        assert_eq!(snapshot.sections.len(), 5);
        assert!(!snapshot.sections["calories"].is_ok());
        assert!(snapshot.sections["health"].is_ok());
    }

    #[tokio::test]
    async fn test_window_out_of_range() {
        let state: SharedAnalytics = Arc::new(Analytics::new(
            Arc::new(FakeStore::default()),
            AnalyticsConfig::default(),
        ));
        let result = get_dashboard(
            State(state),
            Query(WindowQuery {
                date: None,
                days: Some(MAX_WINDOW_DAYS + 1),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
