//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`convert`] - Submission and status polling
//! - [`files`] - Artifact downloads
//! - [`system`] - Health, formats, events, OpenAPI

use crate::types::{StateCounts, TaskId};
use serde::{Deserialize, Serialize};

mod convert;
mod files;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use convert::*;
pub use files::*;
pub use system::*;

// ============================================================================
// Request/Response Types (shared across handlers)
// ============================================================================

/// Multipart form accepted by POST /convert
///
/// Documentation only; the handler reads the fields as a stream.
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ConvertForm {
    /// File to convert
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    /// Target format, e.g. "png"
    pub format: String,
    /// Input format when the filename has no usable extension
    pub source_format: Option<String>,
}

/// Response body for POST /convert
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitResponse {
    /// Identifier to poll with
    pub id: TaskId,
}

/// Response body for GET /health
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// Always "ok" when the server answers
    pub status: String,
    /// Service name
    pub service: String,
    /// Crate version
    pub version: String,
    /// Whether new submissions are accepted
    pub accepting: bool,
    /// Tasks per state, when the store could be queried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<StateCounts>,
}
