// Health PMC API v0.1
use axum::{
    routing::{delete, get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use services::analytics::{Analytics, SharedAnalytics};
use services::store::PgLoadStore;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// OpenAPI document for the Health PMC API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Health PMC API",
        version = "0.1.0",
        description = "Training-load analytics. Computes fitness (CTL), fatigue (ATL) and \
            form (TSB) from recorded workouts, calibrates the model against observed \
            reference values, serves cached workout and dashboard queries, and \
            tracks recovery trends.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "PMC", description = "Performance management chart"),
        (name = "Workouts", description = "Recorded activities"),
        (name = "Calibration", description = "Model parameter fitting"),
        (name = "Reference values", description = "Observed CTL/ATL and weight overrides"),
        (name = "Dashboard", description = "Combined daily view"),
        (name = "Recovery", description = "Health history, trends and daily recommendation"),
        (name = "Cache", description = "Workout index and cache administration"),
    ),
    paths(
        routes::health::health_check,
        routes::pmc::get_pmc,
        routes::workouts::list_workouts,
        routes::workouts::create_workout,
        routes::calibration::get_calibration,
        routes::calibration::run_calibration,
        routes::references::list_reference_values,
        routes::references::write_reference_value,
        routes::references::delete_reference_value,
        routes::dashboard::get_dashboard,
        routes::wellness::get_health_history,
        routes::wellness::get_trends,
        routes::wellness::get_recommendation,
        routes::cache::get_cache_status,
        routes::cache::clear_caches,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::references::ReferenceWrite,
            routes::cache::CacheStatus,
            services::performance::PmcReport,
            services::performance::PmcChart,
            services::pmc::TsbStatus,
            services::pmc::SeriesSeed,
            services::calibration::CalibrationParameters,
            services::calibration::CalibrationOutcome,
            services::calibration::CalibrationStatus,
            services::records::WorkoutRecord,
            services::references::ReferenceMetric,
            services::references::ResolvedReference,
            services::dashboard::DashboardSnapshot,
            services::wellness::HealthHistory,
            services::wellness::HealthTrends,
            services::wellness::Direction,
            services::wellness::TrainingStatus,
            services::wellness::Recommendation,
            services::wellness::Intensity,
            services::wellness::Session,
            services::workout_index::ColdPolicy,
            services::workout_index::IndexPhase,
            services::workout_index::IndexStatus,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "health_pmc_api=debug,tower_http=debug".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Database migrations completed");

    let analytics: SharedAnalytics = Arc::new(Analytics::new(
        Arc::new(PgLoadStore::new(pool)),
        config.analytics.clone(),
    ));

    // Restore calibration parameters and start populating the workout index.
    // A failure here is not fatal: defaults apply and the index retries on demand.
    if let Err(e) = analytics.start().await {
        tracing::warn!("Startup: continuing with default parameters: {}", e);
    }

    let app = router(analytics);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Every route shares the analytics core as its one state.
fn router(analytics: SharedAnalytics) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any)
        .expose_headers([axum::http::header::RETRY_AFTER]);

    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/pmc", get(routes::pmc::get_pmc))
        .route("/api/v1/dashboard", get(routes::dashboard::get_dashboard))
        .route(
            "/api/v1/health/history",
            get(routes::wellness::get_health_history),
        )
        .route("/api/v1/trends", get(routes::wellness::get_trends))
        .route(
            "/api/v1/recommendations/today",
            get(routes::wellness::get_recommendation),
        )
        .route(
            "/api/v1/workouts",
            get(routes::workouts::list_workouts).post(routes::workouts::create_workout),
        )
        .route(
            "/api/v1/calibration",
            get(routes::calibration::get_calibration),
        )
        .route(
            "/api/v1/calibration/run",
            post(routes::calibration::run_calibration),
        )
        .route(
            "/api/v1/reference-values",
            get(routes::references::list_reference_values)
                .post(routes::references::write_reference_value),
        )
        .route(
            "/api/v1/reference-values/:date/:metric",
            delete(routes::references::delete_reference_value),
        )
        .route("/api/v1/cache/status", get(routes::cache::get_cache_status))
        .route("/api/v1/cache/clear", post(routes::cache::clear_caches))
        .with_state(analytics)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
