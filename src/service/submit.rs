//! Upload validation and task creation.

use super::ConversionService;
use crate::error::{Error, Result};
use crate::formats::{extension_of, normalize};
use crate::types::{Event, Task, TaskId};
use bytes::Bytes;
use std::sync::atomic::Ordering;

/// A file to convert
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Uploaded bytes
    pub data: Bytes,
    /// Filename sent with the upload
    pub filename: Option<String>,
    /// Requested output format
    pub target_format: String,
    /// Declared input format; overrides the filename extension
    pub source_format: Option<String>,
}

impl SubmitRequest {
    /// Request for `data` named `filename`, converted to `target_format`
    pub fn new(
        data: impl Into<Bytes>,
        filename: impl Into<String>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            filename: Some(filename.into()),
            target_format: target_format.into(),
            source_format: None,
        }
    }
}

impl ConversionService {
    /// Validate an upload and queue it for conversion
    ///
    /// Returns as soon as the task is persisted in `pending`; conversion happens
    /// on the worker pool. Validation failures create nothing.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId> {
        if !self.workers.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if request.data.is_empty() {
            return Err(Error::MissingInput("uploaded file is empty".to_string()));
        }

        let limit = self.config.limits.max_upload_bytes;
        if request.data.len() as u64 > limit {
            return Err(Error::PayloadTooLarge { limit });
        }

        let target_format = self.validate_target(&request.target_format)?;
        let source_format = source_format_of(&request)?;

        let now = chrono::Utc::now();
        let task = Task::new_pending(
            TaskId::generate(),
            source_format,
            target_format,
            request.filename.filter(|name| !name.trim().is_empty()),
            request.data.len() as u64,
            now,
        );

        let input_key = task.input_key();
        self.blobs.put(&input_key, request.data).await?;

        if let Err(e) = self.store.insert(&task).await {
            if let Err(cleanup) = self.blobs.delete(&input_key).await {
                tracing::warn!(key = %input_key, error = %cleanup, "Failed to remove orphaned input");
            }
            return Err(e);
        }

        tracing::info!(
            task_id = %task.id,
            source_format = %task.source_format,
            target_format = %task.target_format,
            bytes = task.input_size,
            "Conversion queued"
        );

        self.emit_event(Event::Queued {
            id: task.id.clone(),
            source_format: task.source_format.clone(),
            target_format: task.target_format.clone(),
        });
        self.workers.wakeup.notify_one();

        Ok(task.id)
    }

    fn validate_target(&self, requested: &str) -> Result<String> {
        let format = normalize(requested);
        if format.is_empty() {
            return Err(Error::UnsupportedFormat {
                format: None,
                reason: "no target format given".to_string(),
            });
        }

        if !self.catalog.is_supported_target(&format) {
            return Err(Error::UnsupportedFormat {
                reason: format!("'{format}' is not a supported target format"),
                format: Some(format),
            });
        }

        Ok(format)
    }
}

fn source_format_of(request: &SubmitRequest) -> Result<String> {
    let declared = request
        .source_format
        .as_deref()
        .map(normalize)
        .filter(|format| !format.is_empty());

    let format = declared
        .or_else(|| request.filename.as_deref().and_then(extension_of))
        .ok_or_else(|| {
            Error::MissingInput(
                "cannot determine the input format: the filename has no extension".to_string(),
            )
        })?;

    // The format becomes part of the input's blob key
    if !format.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::UnsupportedFormat {
            reason: format!("'{format}' is not a valid input format"),
            format: Some(format),
        });
    }

    Ok(format)
}
