//! Client-facing task status.

use super::ConversionService;
use crate::error::{Error, Result};
use crate::types::{Task, TaskId, TaskState, TaskStatus};

/// Path the artifact endpoint is mounted at
pub(crate) const FILES_PATH: &str = "/api/v1/files";

impl ConversionService {
    /// Current status of a task
    ///
    /// Read-only; unknown ids yield [`Error::NotFound`].
    pub async fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        Ok(self.status_of(&task))
    }

    pub(crate) fn status_of(&self, task: &Task) -> TaskStatus {
        let download_url = match (task.state, &task.artifact_ref) {
            (TaskState::Completed, Some(reference)) => Some(self.download_url(reference)),
            _ => None,
        };

        TaskStatus {
            id: task.id.clone(),
            status: task.state,
            download_url,
            error: task.error.as_ref().map(ToString::to_string),
            error_code: task.error.as_ref().map(|e| e.code().to_string()),
            source_format: task.source_format.clone(),
            target_format: task.target_format.clone(),
            attempts: task.attempts,
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }

    /// Where clients fetch an artifact
    ///
    /// Relative unless `server.api.public_base_url` is set.
    pub fn download_url(&self, artifact_ref: &str) -> String {
        let path = format!("{FILES_PATH}/{artifact_ref}");

        let Some(base) = self.config.server.api.public_base_url.as_deref() else {
            return path;
        };

        match url::Url::parse(base).and_then(|base| base.join(&path)) {
            Ok(url) => url.to_string(),
            Err(e) => {
                // Config::validate rejects unparsable base URLs
                tracing::warn!(base_url = %base, error = %e, "Invalid public_base_url, using relative download URL");
                path
            }
        }
    }
}
