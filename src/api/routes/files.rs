//! Artifact download handler.

use crate::api::AppState;
use crate::error::Result;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

/// GET /files/:reference - Download a finished artifact
#[utoipa::path(
    get,
    path = "/api/v1/files/{reference}",
    tag = "convert",
    params(
        ("reference" = String, Path, description = "Artifact reference from the status download_url, `{id}.{ext}`")
    ),
    responses(
        (status = 200, description = "Converted file", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown or expired artifact", body = crate::error::ApiError),
        (status = 409, description = "Conversion has not completed", body = crate::error::ApiError)
    )
)]
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Response> {
    let download = state.service.open_artifact(&reference).await?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(download.content_type)),
        (header::CONTENT_LENGTH, HeaderValue::from(download.len)),
        (header::CONTENT_DISPOSITION, disposition),
    ];

    Ok((headers, Body::from_stream(download.stream)).into_response())
}
