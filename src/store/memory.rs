//! In-memory task store
//!
//! Records live behind per-task `RwLock`s inside a map, so writes to
//! unrelated tasks never contend. The pending index is the only shared
//! lock on the claim path; it is ordered by `(created_at, id)` which gives
//! FIFO claiming with a deterministic tie-break.
//!
//! Lock order: `pending` -> `tasks` -> record. Paths that need the pending
//! index after touching a record drop the record lock first.

use super::{TaskStore, lease_deadline};
use crate::error::{DatabaseError, Result};
use crate::types::{Claim, ClaimToken, StateCounts, Task, TaskFailure, TaskId, TaskState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

type PendingKey = (DateTime<Utc>, TaskId);

/// Task store that keeps every record in process memory
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Arc<RwLock<Task>>>>,
    pending: Mutex<BTreeSet<PendingKey>>,
}

impl MemoryTaskStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, id: &TaskId) -> Option<Arc<RwLock<Task>>> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Apply `update` to a processing task if `claim` still matches it
    async fn transition<F>(&self, claim: &ClaimToken, update: F) -> Result<bool>
    where
        F: FnOnce(&mut Task) + Send,
    {
        let Some(record) = self.record(&claim.id).await else {
            return Ok(false);
        };

        let mut task = record.write().await;
        if !holds_claim(&task, claim) {
            return Ok(false);
        }
        update(&mut task);
        Ok(true)
    }

    async fn snapshot_where<P>(&self, predicate: P) -> Vec<Task>
    where
        P: Fn(&Task) -> bool,
    {
        let records: Vec<_> = self.tasks.read().await.values().cloned().collect();
        let mut matching = Vec::new();
        for record in records {
            let task = record.read().await;
            if predicate(&task) {
                matching.push(task.clone());
            }
        }
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        matching
    }
}

fn holds_claim(task: &Task, claim: &ClaimToken) -> bool {
    task.state == TaskState::Processing
        && task.attempts == claim.attempt
        && task
            .claim
            .as_ref()
            .is_some_and(|c| c.worker_id == claim.worker_id)
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        {
            let mut tasks = self.tasks.write().await;
            if tasks.contains_key(&task.id) {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "task {} already exists",
                    task.id
                ))
                .into());
            }
            tasks.insert(task.id.clone(), Arc::new(RwLock::new(task.clone())));
        }

        if task.state == TaskState::Pending {
            self.pending
                .lock()
                .await
                .insert((task.created_at, task.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        match self.record(id).await {
            Some(record) => Ok(Some(record.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Task>> {
        let mut pending = self.pending.lock().await;
        let mut stale = Vec::new();
        let mut claimed = None;

        for key in pending.iter() {
            let Some(record) = self.record(&key.1).await else {
                stale.push(key.clone());
                continue;
            };

            let mut task = record.write().await;
            if task.state != TaskState::Pending {
                stale.push(key.clone());
                continue;
            }
            if task.available_at > now {
                continue;
            }

            task.state = TaskState::Processing;
            task.attempts += 1;
            task.claim = Some(Claim {
                worker_id: worker_id.to_string(),
                claimed_at: now,
                lease_expires_at: lease_deadline(now, lease),
            });
            task.updated_at = now;

            stale.push(key.clone());
            claimed = Some(task.clone());
            break;
        }

        for key in stale {
            pending.remove(&key);
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        claim: &ClaimToken,
        artifact_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(claim, |task| {
            task.state = TaskState::Completed;
            task.artifact_ref = Some(artifact_ref.to_string());
            task.claim = None;
            task.completed_at = Some(now);
            task.updated_at = now;
        })
        .await
    }

    async fn fail(
        &self,
        claim: &ClaimToken,
        failure: &TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(claim, |task| {
            task.state = TaskState::Failed;
            task.error = Some(failure.clone());
            task.claim = None;
            task.completed_at = Some(now);
            task.updated_at = now;
        })
        .await
    }

    async fn release(
        &self,
        claim: &ClaimToken,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut created_at = None;
        let released = self
            .transition(claim, |task| {
                task.state = TaskState::Pending;
                task.claim = None;
                task.available_at = available_at;
                task.updated_at = now;
                created_at = Some(task.created_at);
            })
            .await?;

        if let Some(created_at) = created_at {
            self.pending.lock().await.insert((created_at, claim.id.clone()));
        }
        Ok(released)
    }

    async fn expired_claims(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        Ok(self
            .snapshot_where(|task| {
                task.state == TaskState::Processing
                    && task
                        .claim
                        .as_ref()
                        .is_some_and(|c| c.lease_expires_at <= now)
            })
            .await)
    }

    async fn expirable_artifacts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        Ok(self
            .snapshot_where(|task| {
                task.state == TaskState::Completed
                    && task.artifact_expired_at.is_none()
                    && task.completed_at.is_some_and(|at| at < cutoff)
            })
            .await)
    }

    async fn mark_artifact_expired(&self, id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let Some(record) = self.record(id).await else {
            return Ok(false);
        };

        let mut task = record.write().await;
        if task.state != TaskState::Completed || task.artifact_expired_at.is_some() {
            return Ok(false);
        }
        task.artifact_expired_at = Some(now);
        task.updated_at = now;
        Ok(true)
    }

    async fn terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        Ok(self
            .snapshot_where(|task| {
                task.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff)
            })
            .await)
    }

    async fn remove(&self, id: &TaskId) -> Result<bool> {
        let removed = self.tasks.write().await.remove(id);
        let Some(record) = removed else {
            return Ok(false);
        };

        let created_at = record.read().await.created_at;
        self.pending.lock().await.remove(&(created_at, id.clone()));
        Ok(true)
    }

    async fn count_by_state(&self) -> Result<StateCounts> {
        let records: Vec<_> = self.tasks.read().await.values().cloned().collect();
        let mut counts = StateCounts::default();
        for record in records {
            counts.record(record.read().await.state);
        }
        Ok(counts)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
