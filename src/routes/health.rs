use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::analytics::SharedAnalytics;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when the load store is unreachable)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the load store answered a ping
    pub database: bool,
}

impl HealthResponse {
    fn new(store_ok: bool) -> Self {
        Self {
            status: if store_ok {
                "ok".to_string()
            } else {
                "degraded".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: store_ok,
        }
    }
}

/// Health check endpoint.
///
/// Returns status "degraded" (still 200) if the store is unreachable, so
/// load balancers can distinguish partial failures.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(analytics): State<SharedAnalytics>) -> Json<HealthResponse> {
    Json(HealthResponse::new(analytics.store_reachable().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analytics::{Analytics, AnalyticsConfig};
    use crate::services::store::fake::FakeStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_reports_store_state() {
        let store = Arc::new(FakeStore::default());
        let analytics = Arc::new(Analytics::new(store.clone(), AnalyticsConfig::default()));

        let Json(ok) = health_check(State(analytics.clone())).await;
        assert_eq!(ok.status, "ok");
        assert!(ok.database);

        store.fail("ping");
        let Json(degraded) = health_check(State(analytics)).await;
        assert_eq!(degraded.status, "degraded");
        assert!(!degraded.database);
    }
}
