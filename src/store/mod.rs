//! Task store
//!
//! The store exclusively owns task records. Every state change goes through
//! one of the conditional operations below, so two callers can never both
//! win a race for the same task:
//!
//! - [`TaskStore::claim_next`] atomically moves the oldest eligible pending
//!   task to `processing`.
//! - [`TaskStore::complete`], [`TaskStore::fail`] and [`TaskStore::release`]
//!   only apply while the caller still holds the claim described by its
//!   [`ClaimToken`]. They return `false` when the claim was lost (for example
//!   because the reaper took the task back after the lease expired).
//!
//! ## Backends
//!
//! - [`MemoryTaskStore`] keeps records in process memory.
//! - [`SqliteTaskStore`] persists records with sqlx.

use crate::error::Result;
use crate::types::{ClaimToken, StateCounts, Task, TaskFailure, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Storage backend for conversion task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new pending task
    async fn insert(&self, task: &Task) -> Result<()>;

    /// Load a task by id
    async fn get(&self, id: &TaskId) -> Result<Option<Task>>;

    /// Claim the oldest pending task whose `available_at <= now`
    ///
    /// The claim increments `attempts` and holds the task until
    /// `now + lease`. Returns the updated task, or `None` when nothing is
    /// eligible.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Task>>;

    /// Mark a claimed task completed with its artifact reference
    async fn complete(
        &self,
        claim: &ClaimToken,
        artifact_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark a claimed task failed
    async fn fail(&self, claim: &ClaimToken, failure: &TaskFailure, now: DateTime<Utc>)
    -> Result<bool>;

    /// Return a claimed task to pending, claimable again from `available_at`
    async fn release(
        &self,
        claim: &ClaimToken,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Processing tasks whose lease expired at or before `now`
    async fn expired_claims(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Completed tasks finished before `cutoff` whose artifact is still live
    async fn expirable_artifacts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Record that a task's artifact was deleted
    async fn mark_artifact_expired(&self, id: &TaskId, now: DateTime<Utc>) -> Result<bool>;

    /// Terminal tasks finished before `cutoff`
    async fn terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Delete a task record
    async fn remove(&self, id: &TaskId) -> Result<bool>;

    /// Number of tasks in each state
    async fn count_by_state(&self) -> Result<StateCounts>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
