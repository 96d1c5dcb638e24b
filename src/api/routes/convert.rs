//! Submission and status handlers.

use super::SubmitResponse;
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::service::SubmitRequest;
use crate::types::{TaskId, TaskStatus};
use axum::{
    Json,
    extract::{
        Path, State,
        multipart::{Field, Multipart, MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};

/// POST /convert - Upload a file and queue its conversion
#[utoipa::path(
    post,
    path = "/api/v1/convert",
    tag = "convert",
    request_body(content = super::ConvertForm, description = "File and target format", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Conversion queued", body = SubmitResponse),
        (status = 400, description = "Missing file or unsupported format", body = crate::error::ApiError),
        (status = 413, description = "File exceeds the upload limit", body = crate::error::ApiError),
        (status = 503, description = "Service is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_conversion(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<SubmitResponse>> {
    let mut multipart = multipart.map_err(|e| {
        Error::MissingInput(format!("expected a multipart/form-data body: {}", e.body_text()))
    })?;
    let limit = state.config.limits.max_upload_bytes;

    let mut file: Option<(Bytes, Option<String>)> = None;
    let mut format: Option<String> = None;
    let mut source_format: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let data = read_limited(field, limit).await?;
                file = Some((data, filename));
            }
            "format" => {
                format = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            "source_format" => {
                source_format = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            _ => {}
        }
    }

    let Some((data, filename)) = file else {
        return Err(Error::MissingInput(
            "no file provided in 'file' field".to_string(),
        ));
    };

    let id = state
        .service
        .submit(SubmitRequest {
            data,
            filename,
            target_format: format.unwrap_or_default(),
            source_format,
        })
        .await?;

    Ok(Json(SubmitResponse { id }))
}

/// Read one upload field, stopping as soon as it exceeds `limit`
async fn read_limited(mut field: Field<'_>, limit: u64) -> Result<Bytes> {
    let mut buffer = BytesMut::new();

    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(Error::PayloadTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

fn multipart_error(error: MultipartError, limit: u64) -> Error {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::MissingInput(format!("malformed multipart body: {}", error.body_text()))
    }
}

/// GET /convert/:id/status - Poll a conversion
#[utoipa::path(
    get,
    path = "/api/v1/convert/{id}/status",
    tag = "convert",
    params(
        ("id" = String, Path, description = "Task ID returned by POST /convert")
    ),
    responses(
        (status = 200, description = "Current task status", body = TaskStatus),
        (status = 404, description = "Unknown task", body = crate::error::ApiError)
    )
)]
pub async fn conversion_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatus>> {
    let status = state.service.status(&TaskId::from(id)).await?;
    Ok(Json(status))
}
