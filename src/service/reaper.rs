//! Recovery of tasks whose claim lease expired.
//!
//! A worker that crashes, hangs, or belongs to a process that went away leaves
//! its task in `processing`. Once the lease runs out the reaper applies the
//! same rule as a failed attempt: back to `pending` with backoff, or `failed`
//! when the attempt budget is spent.

use super::ConversionService;
use crate::error::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

impl ConversionService {
    /// Recover every task whose lease expired at or before `now`
    ///
    /// Returns how many tasks were moved out of `processing`.
    pub async fn reap_expired_claims(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.expired_claims(now).await?;
        let mut reaped = 0;

        for task in expired {
            let Some(claim) = task.claim_token() else {
                continue;
            };
            let cause = format!(
                "claim by worker {} expired after {:?}",
                claim.worker_id, self.config.workers.claim_timeout
            );

            match self.requeue_or_fail(&task, &claim, cause).await {
                Ok(true) => reaped += 1,
                Ok(false) => {
                    tracing::debug!(task_id = %task.id, "Claim was resolved before it could be reaped");
                }
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Failed to reap expired claim");
                }
            }
        }

        if reaped > 0 {
            tracing::info!(reaped, "Recovered tasks with expired claims");
        }
        Ok(reaped)
    }

    /// Start the background reaper
    ///
    /// Runs once immediately, which recovers tasks left in `processing` by a
    /// previous run, then every `workers.reap_interval`.
    pub(crate) fn start_reaper(&self) -> JoinHandle<()> {
        let service = self.clone();
        let interval = self.config.workers.reap_interval;

        tokio::spawn(async move {
            loop {
                if let Err(e) = service.reap_expired_claims(Utc::now()).await {
                    tracing::error!(error = %e, "Claim reaper pass failed");
                }

                tokio::select! {
                    _ = service.workers.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!("Claim reaper stopped");
        })
    }
}
