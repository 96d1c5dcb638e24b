//! REST API server module
//!
//! Provides an OpenAPI 3.1 compliant REST API for submitting conversions,
//! polling their status, and downloading the results.

use crate::{Config, ConversionService, Result};
use axum::{Router, extract::DefaultBodyLimit, http::HeaderValue, routing::get, routing::post};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Prefix every route is mounted under
pub const API_PREFIX: &str = "/api/v1";

/// Room for multipart boundaries and the text fields on top of the upload limit
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Create the API router with all route definitions
///
/// # Routes
///
/// All routes are mounted under `/api/v1`.
///
/// ## Conversions
/// - `POST /convert` - Upload a file and queue its conversion
/// - `GET /convert/:id/status` - Poll a conversion
/// - `GET /files/:reference` - Download a finished artifact
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /formats` - Supported formats
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /events` - Server-sent events stream
///
/// `GET /swagger-ui` (interactive documentation) sits outside the prefix and
/// is only mounted when enabled.
pub fn create_router(service: Arc<ConversionService>, config: Arc<Config>) -> Router {
    let state = AppState::new(service, config.clone());

    let body_limit = config
        .limits
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let api = Router::new()
        // Conversions
        .route(
            "/convert",
            post(routes::submit_conversion).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/convert/:id/status", get(routes::conversion_status))
        .route("/files/:reference", get(routes::download_artifact))
        // System
        .route("/health", get(routes::health_check))
        .route("/formats", get(routes::list_formats))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .with_state(state);

    let router = Router::new().nest(API_PREFIX, api);

    // Swagger UI serves its own copy of the document outside the API prefix
    let router = if config.server.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    // Apply CORS middleware if enabled in config
    if config.server.api.cors_enabled {
        let cors = build_cors_layer(&config.server.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on an already bound listener until the server stops
pub async fn serve(
    listener: TcpListener,
    service: Arc<ConversionService>,
    config: Arc<Config>,
) -> Result<()> {
    let app = create_router(service, config);

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops, either due to an error or because the task
/// running it was aborted.
///
/// # Example
///
/// ```no_run
/// use convertd::{ConversionService, Config};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let service = Arc::new(ConversionService::new((*config).clone()).await?);
/// let _workers = service.start();
///
/// // Start API server (blocks until shutdown)
/// convertd::api::start_api_server(service, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(service: Arc<ConversionService>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.server.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    serve(listener, service, config).await
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
