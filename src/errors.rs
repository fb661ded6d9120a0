use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::store::StoreError;

/// Seconds a client is asked to wait after a `StaleIndexTimeout`.
const RETRY_AFTER_SECS: &str = "5";

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The load store could not be reached or failed the query.
    #[error("No data: load store unavailable ({0})")]
    UpstreamUnavailable(String),

    /// The workout index is still populating and the caller chose not to fall back.
    #[error("Workout index is still loading, try again shortly")]
    StaleIndexTimeout,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UpstreamUnavailable(_) => {
                tracing::warn!("{}", self);
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::StaleIndexTimeout => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                )
            }
        };

        let mut response = (status, axum::Json(ErrorResponse { error: message })).into_response();
        if matches!(self, AppError::StaleIndexTimeout) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}
