//! Worker pool that claims pending tasks and runs their conversions.
//!
//! Each worker loop claims one task at a time, converts it, and writes the
//! terminal result. Idle workers sleep until a submission wakes them or the
//! poll interval elapses.

use super::ConversionService;
use crate::converter::{ConversionInput, ConverterError};
use crate::error::Result;
use crate::retry::{IsRetryable, backoff_delay, with_retry};
use crate::store::lease_deadline;
use crate::types::{ClaimToken, Event, Task, TaskFailure, artifact_key};
use bytes::Bytes;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Attempts for a single store write before the error is surfaced
const STORE_WRITE_ATTEMPTS: u32 = 3;

/// Why an attempt did not produce an artifact
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Retrying cannot help
    Permanent(TaskFailure),
    /// A later attempt may succeed
    Retryable(String),
}

impl ConversionService {
    /// Spawn `workers.count` worker loops
    pub(crate) fn start_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.count)
            .map(|worker| {
                let service = self.clone();
                let worker_id = format!("{}-{}", self.workers.instance_id, worker);
                tokio::spawn(async move { service.run_worker(worker, worker_id).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, worker_id: String) {
        tracing::info!(worker, worker_id = %worker_id, "Worker started");
        let poll_interval = self.config.workers.poll_interval;

        loop {
            if self.workers.shutdown.is_cancelled() {
                break;
            }

            match self.claim_next(&worker_id).await {
                Ok(Some(task)) => {
                    self.process_claimed(task, &worker_id).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker, error = %e, "Failed to claim next task");
                }
            }

            tokio::select! {
                _ = self.workers.shutdown.cancelled() => break,
                _ = self.workers.wakeup.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::info!(worker, worker_id = %worker_id, "Worker stopped");
    }

    /// Claim the oldest eligible task for `worker_id`
    pub(crate) async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>> {
        self.store
            .claim_next(worker_id, Utc::now(), self.config.workers.claim_timeout)
            .await
    }

    /// Run one claimed task to a terminal state or back to pending
    pub(crate) async fn process_claimed(&self, task: Task, worker_id: &str) {
        let Some(claim) = task.claim_token() else {
            tracing::error!(task_id = %task.id, "Claimed task carries no claim");
            return;
        };

        self.workers
            .active
            .lock()
            .await
            .insert(task.id.clone(), worker_id.to_string());

        tracing::info!(
            task_id = %task.id,
            worker_id = %worker_id,
            attempt = task.attempts,
            source_format = %task.source_format,
            target_format = %task.target_format,
            "Conversion started"
        );
        self.emit_event(Event::Processing {
            id: task.id.clone(),
            worker_id: worker_id.to_string(),
            attempt: task.attempts,
        });

        let started = Instant::now();
        let outcome = match self.attempt(&task).await {
            Ok(data) => self.store_artifact(&task, &claim, data, started).await,
            Err(AttemptError::Permanent(failure)) => self.fail_task(&task, &claim, failure).await,
            Err(AttemptError::Retryable(cause)) => self.requeue_or_fail(&task, &claim, cause).await,
        };

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    task_id = %task.id,
                    worker_id = %worker_id,
                    attempt = task.attempts,
                    "Claim was lost before the result could be recorded"
                );
            }
            Err(e) => {
                // The lease stays in place; the reaper recovers the task
                tracing::error!(task_id = %task.id, error = %e, "Failed to record conversion result");
            }
        }

        self.workers.active.lock().await.remove(&task.id);
    }

    /// Run the converter for one attempt
    ///
    /// The converter runs in its own task so that a panic is contained, and is
    /// aborted when the claim lease runs out.
    pub(crate) async fn attempt(&self, task: &Task) -> std::result::Result<Bytes, AttemptError> {
        let Some(converter) = self
            .converters
            .get(&task.source_format, &task.target_format)
        else {
            return Err(AttemptError::Permanent(TaskFailure::UnsupportedConversion {
                source_format: task.source_format.clone(),
                target_format: task.target_format.clone(),
            }));
        };

        let data = match self.blobs.get(&task.input_key()).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                return Err(AttemptError::Permanent(TaskFailure::ConversionFailed {
                    message: "input file is missing".to_string(),
                }));
            }
            Err(e) => {
                return Err(AttemptError::Retryable(format!("failed to read input: {e}")));
            }
        };

        let input = ConversionInput {
            task_id: task.id.clone(),
            attempt: task.attempts,
            source_format: task.source_format.clone(),
            target_format: task.target_format.clone(),
            original_filename: task.original_filename.clone(),
            data,
        };

        let budget = self.remaining_lease(task);
        let mut handle = tokio::spawn(async move { converter.convert(input).await });

        let joined = match tokio::time::timeout(budget, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                let timeout = ConverterError::Timeout(self.config.workers.claim_timeout);
                return Err(AttemptError::Retryable(timeout.to_string()));
            }
        };

        match joined {
            Ok(Ok(output)) if output.data.is_empty() => {
                Err(AttemptError::Permanent(TaskFailure::ConversionFailed {
                    message: "converter produced no output".to_string(),
                }))
            }
            Ok(Ok(output)) => Ok(output.data),
            Ok(Err(ConverterError::Unsupported { .. })) => {
                Err(AttemptError::Permanent(TaskFailure::UnsupportedConversion {
                    source_format: task.source_format.clone(),
                    target_format: task.target_format.clone(),
                }))
            }
            Ok(Err(e)) if e.is_retryable() => Err(AttemptError::Retryable(e.to_string())),
            Ok(Err(e)) => Err(AttemptError::Permanent(TaskFailure::ConversionFailed {
                message: e.to_string(),
            })),
            Err(e) if e.is_panic() => Err(AttemptError::Retryable("converter panicked".to_string())),
            Err(_) => Err(AttemptError::Retryable(
                "conversion task was cancelled".to_string(),
            )),
        }
    }

    fn remaining_lease(&self, task: &Task) -> Duration {
        task.claim
            .as_ref()
            .map(|claim| {
                (claim.lease_expires_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(self.config.workers.claim_timeout)
    }

    async fn store_artifact(
        &self,
        task: &Task,
        claim: &ClaimToken,
        data: Bytes,
        started: Instant,
    ) -> Result<bool> {
        let artifact_ref = task.artifact_ref_for();
        let bytes = data.len();

        if let Err(e) = self.blobs.put(&artifact_key(&artifact_ref), data).await {
            return self
                .requeue_or_fail(task, claim, format!("failed to store artifact: {e}"))
                .await;
        }

        let completed = with_retry(&self.config.retry, STORE_WRITE_ATTEMPTS, || {
            self.store.complete(claim, &artifact_ref, Utc::now())
        })
        .await?;

        if completed {
            tracing::info!(
                task_id = %task.id,
                attempt = task.attempts,
                bytes,
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Conversion completed"
            );
            self.emit_event(Event::Completed {
                id: task.id.clone(),
                artifact_ref,
            });
            self.discard_input(task).await;
        }

        Ok(completed)
    }

    /// Move a claimed task to `failed`
    pub(crate) async fn fail_task(
        &self,
        task: &Task,
        claim: &ClaimToken,
        failure: TaskFailure,
    ) -> Result<bool> {
        let failed = with_retry(&self.config.retry, STORE_WRITE_ATTEMPTS, || {
            self.store.fail(claim, &failure, Utc::now())
        })
        .await?;

        if failed {
            tracing::warn!(
                task_id = %task.id,
                attempt = task.attempts,
                code = failure.code(),
                error = %failure,
                "Conversion failed"
            );
            self.emit_event(Event::Failed {
                id: task.id.clone(),
                code: failure.code().to_string(),
                error: failure.to_string(),
            });
            self.discard_input(task).await;
        }

        Ok(failed)
    }

    /// Return a claimed task to pending with backoff, or fail it once the
    /// attempt budget is spent
    pub(crate) async fn requeue_or_fail(
        &self,
        task: &Task,
        claim: &ClaimToken,
        cause: String,
    ) -> Result<bool> {
        if task.attempts >= self.config.workers.max_attempts {
            let failure = TaskFailure::MaxRetriesExceeded {
                attempts: task.attempts,
                last_error: cause,
            };
            return self.fail_task(task, claim, failure).await;
        }

        let now = Utc::now();
        let delay = backoff_delay(&self.config.retry, task.attempts);
        let retry_at = lease_deadline(now, delay);

        let released = with_retry(&self.config.retry, STORE_WRITE_ATTEMPTS, || {
            self.store.release(claim, retry_at, now)
        })
        .await?;

        if released {
            tracing::warn!(
                task_id = %task.id,
                attempt = task.attempts,
                max_attempts = self.config.workers.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason = %cause,
                "Conversion attempt failed, task requeued"
            );
            self.emit_event(Event::Requeued {
                id: task.id.clone(),
                attempt: task.attempts,
                reason: cause,
                retry_at,
            });
        }

        Ok(released)
    }

    /// Delete the input of a task that reached a terminal state
    pub(crate) async fn discard_input(&self, task: &Task) {
        if let Err(e) = self.blobs.delete(&task.input_key()).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to delete input");
        }
    }
}
