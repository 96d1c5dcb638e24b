//! Artifact lookup for downloads.

use super::ConversionService;
use crate::blob::BlobStream;
use crate::error::{Error, Result};
use crate::types::{Task, TaskId, TaskState, artifact_key};
use chrono::{DateTime, Utc};
use std::path::Path;

/// An artifact ready to be streamed to a client
pub struct ArtifactDownload {
    /// Suggested download filename
    pub filename: String,
    /// Content type of the target format
    pub content_type: &'static str,
    /// Size in bytes
    pub len: u64,
    /// Artifact contents
    pub stream: BlobStream,
}

impl std::fmt::Debug for ArtifactDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactDownload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.len)
            .finish()
    }
}

impl ConversionService {
    /// Open the artifact named by `reference` (`{id}.{ext}`)
    ///
    /// - unknown reference → [`Error::NotFound`]
    /// - task not completed yet → [`Error::NotReady`]
    /// - artifact expired or missing → [`Error::NotFound`]
    pub async fn open_artifact(&self, reference: &str) -> Result<ArtifactDownload> {
        let not_found = || Error::NotFound(format!("artifact {reference}"));

        let (id, ext) = reference.rsplit_once('.').ok_or_else(not_found)?;
        let task = self
            .store
            .get(&TaskId::from(id))
            .await?
            .ok_or_else(not_found)?;

        if task.target_format != ext {
            return Err(not_found());
        }

        if task.state != TaskState::Completed {
            return Err(Error::NotReady {
                id: task.id.to_string(),
                state: task.state,
            });
        }

        if task.artifact_ref.as_deref() != Some(reference)
            || self.artifact_expired(&task, Utc::now())
        {
            return Err(not_found());
        }

        let reader = self
            .blobs
            .open(&artifact_key(reference))
            .await?
            .ok_or_else(|| {
                tracing::warn!(task_id = %task.id, reference, "Artifact blob is missing");
                not_found()
            })?;

        Ok(ArtifactDownload {
            filename: download_filename(&task),
            content_type: self.catalog.content_type(&task.target_format),
            len: reader.len,
            stream: reader.stream,
        })
    }

    /// Whether retention has removed, or is due to remove, the task's artifact
    pub(crate) fn artifact_expired(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if task.artifact_expired_at.is_some() {
            return true;
        }
        let (Some(completed_at), Ok(ttl)) = (
            task.completed_at,
            chrono::Duration::from_std(self.config.retention.artifact_ttl),
        ) else {
            return false;
        };
        completed_at
            .checked_add_signed(ttl)
            .is_some_and(|expires_at| expires_at <= now)
    }
}

/// Original filename stem with the target extension, falling back to the task id
fn download_filename(task: &Task) -> String {
    let stem = task
        .original_filename
        .as_deref()
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            stem.chars()
                .filter(|c| !c.is_control() && !matches!(c, '"' | '\\' | '/'))
                .collect::<String>()
        })
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| task.id.to_string());

    format!("{stem}.{}", task.target_format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(filename: Option<&str>) -> Task {
        Task::new_pending(
            TaskId::from("abc"),
            "jpg",
            "png",
            filename.map(String::from),
            1,
            Utc::now(),
        )
    }

    #[test]
    fn filename_keeps_the_original_stem() {
        assert_eq!(download_filename(&task(Some("holiday.JPG"))), "holiday.png");
    }

    #[test]
    fn filename_falls_back_to_the_task_id() {
        assert_eq!(download_filename(&task(None)), "abc.png");
        assert_eq!(download_filename(&task(Some(".jpg"))), ".jpg.png");
    }

    #[test]
    fn filename_drops_header_breaking_characters() {
        assert_eq!(download_filename(&task(Some("a\"b\r\n.jpg"))), "ab.png");
    }
}
