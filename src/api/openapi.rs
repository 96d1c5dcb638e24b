//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the convertd REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the convertd REST API
///
/// The document can be accessed via:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "convertd REST API",
        version = "0.1.0",
        description = "Asynchronous file conversion: upload a file, poll the task, download the result"
    ),
    servers(
        (url = "http://localhost:3001", description = "Local development server")
    ),
    paths(
        // Conversions
        crate::api::routes::submit_conversion,
        crate::api::routes::conversion_status,
        crate::api::routes::download_artifact,

        // System
        crate::api::routes::health_check,
        crate::api::routes::list_formats,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::TaskState,
        crate::types::TaskStatus,
        crate::types::TaskFailure,
        crate::types::StateCounts,
        crate::types::Event,

        // Formats
        crate::formats::FormatCategory,
        crate::formats::FormatSet,

        // API request/response types from routes
        crate::api::routes::ConvertForm,
        crate::api::routes::SubmitResponse,
        crate::api::routes::HealthResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "convert", description = "Conversions - Submit files, poll status, download results"),
        (name = "system", description = "System endpoints - Health checks, formats, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
