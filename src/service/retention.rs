//! Artifact and record expiry.

use super::ConversionService;
use crate::error::Result;
use crate::types::{Event, Task, artifact_key};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

/// What one retention pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Artifacts deleted because they outlived `retention.artifact_ttl`
    pub artifacts_expired: usize,
    /// Terminal task records deleted because they outlived `retention.task_ttl`
    pub tasks_purged: usize,
}

fn cutoff(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
}

impl ConversionService {
    /// Run one retention pass as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let retention = &self.config.retention;

        if let Some(cutoff) = cutoff(now, retention.artifact_ttl) {
            for task in self.store.expirable_artifacts(cutoff).await? {
                if self.expire_artifact(&task, now).await? {
                    report.artifacts_expired += 1;
                }
            }
        }

        if let Some(cutoff) = retention.task_ttl.and_then(|ttl| cutoff(now, ttl)) {
            for task in self.store.terminal_before(cutoff).await? {
                self.delete_blobs(&task).await;
                if self.store.remove(&task.id).await? {
                    tracing::debug!(task_id = %task.id, "Task record purged");
                    report.tasks_purged += 1;
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                artifacts_expired = report.artifacts_expired,
                tasks_purged = report.tasks_purged,
                "Retention sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire_artifact(&self, task: &Task, now: DateTime<Utc>) -> Result<bool> {
        self.delete_blobs(task).await;

        let marked = self.store.mark_artifact_expired(&task.id, now).await?;
        if marked {
            tracing::debug!(task_id = %task.id, "Artifact expired");
            self.emit_event(Event::ArtifactExpired {
                id: task.id.clone(),
            });
        }
        Ok(marked)
    }

    /// Delete every blob a terminal task may still own
    ///
    /// Failed tasks can own an artifact too, written by an attempt whose
    /// claim was reaped before it could complete.
    async fn delete_blobs(&self, task: &Task) {
        for key in [task.input_key(), artifact_key(&task.artifact_ref_for())] {
            if let Err(e) = self.blobs.delete(&key).await {
                tracing::warn!(task_id = %task.id, key = %key, error = %e, "Failed to delete blob");
            }
        }
    }

    /// Start the background retention sweeper
    pub(crate) fn start_sweeper(&self) -> JoinHandle<()> {
        let service = self.clone();
        let interval = self.config.retention.sweep_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = service.workers.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                if let Err(e) = service.sweep(Utc::now()).await {
                    tracing::error!(error = %e, "Retention sweep failed");
                }
            }
            tracing::debug!("Retention sweeper stopped");
        })
    }
}
