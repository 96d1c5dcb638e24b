//! TaskStore implementation for SQLite.

use super::{SqliteTaskStore, TASK_COLUMNS, TaskRow, query_failed, to_millis};
use crate::error::DatabaseError;
use crate::store::{TaskStore, lease_deadline};
use crate::types::{ClaimToken, StateCounts, Task, TaskFailure, TaskId, TaskState};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

impl SqliteTaskStore {
    async fn fetch_tasks(&self, sql: &str, at: i64, context: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(sql)
            .bind(at)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed(context, e))?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        let error_json = task
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let claim = task.claim.as_ref();

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, source_format, target_format, state, original_filename,
                input_size, attempts, worker_id, claimed_at, lease_expires_at,
                error_json, artifact_ref, artifact_expired_at,
                created_at, updated_at, available_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.source_format)
        .bind(&task.target_format)
        .bind(task.state.as_str())
        .bind(&task.original_filename)
        .bind(i64::try_from(task.input_size).unwrap_or(i64::MAX))
        .bind(i64::from(task.attempts))
        .bind(claim.map(|c| c.worker_id.clone()))
        .bind(claim.map(|c| to_millis(c.claimed_at)))
        .bind(claim.map(|c| to_millis(c.lease_expires_at)))
        .bind(error_json)
        .bind(&task.artifact_ref)
        .bind(task.artifact_expired_at.map(to_millis))
        .bind(to_millis(task.created_at))
        .bind(to_millis(task.updated_at))
        .bind(to_millis(task.available_at))
        .bind(task.completed_at.map(to_millis))
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Database(
                DatabaseError::ConstraintViolation(format!("task {} already exists", task.id)),
            ),
            _ => query_failed("Failed to insert task", e),
        })?;

        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get task", e))?;

        row.map(Task::try_from).transpose()
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Task>> {
        let now_ms = to_millis(now);
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET state = 'processing',
                attempts = attempts + 1,
                worker_id = ?,
                claimed_at = ?,
                lease_expires_at = ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM tasks
                WHERE state = 'pending' AND available_at <= ?
                ORDER BY created_at, id
                LIMIT 1
            )
            AND state = 'pending'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(now_ms)
        .bind(to_millis(lease_deadline(now, lease)))
        .bind(now_ms)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to claim task", e))?;

        row.map(Task::try_from).transpose()
    }

    async fn complete(
        &self,
        claim: &ClaimToken,
        artifact_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = to_millis(now);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'completed', artifact_ref = ?, completed_at = ?, updated_at = ?,
                worker_id = NULL, claimed_at = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = 'processing' AND worker_id = ? AND attempts = ?
            "#,
        )
        .bind(artifact_ref)
        .bind(now_ms)
        .bind(now_ms)
        .bind(&claim.id)
        .bind(&claim.worker_id)
        .bind(i64::from(claim.attempt))
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to complete task", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(
        &self,
        claim: &ClaimToken,
        failure: &TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = to_millis(now);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'failed', error_json = ?, completed_at = ?, updated_at = ?,
                worker_id = NULL, claimed_at = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = 'processing' AND worker_id = ? AND attempts = ?
            "#,
        )
        .bind(serde_json::to_string(failure)?)
        .bind(now_ms)
        .bind(now_ms)
        .bind(&claim.id)
        .bind(&claim.worker_id)
        .bind(i64::from(claim.attempt))
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to fail task", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        claim: &ClaimToken,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'pending', available_at = ?, updated_at = ?,
                worker_id = NULL, claimed_at = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = 'processing' AND worker_id = ? AND attempts = ?
            "#,
        )
        .bind(to_millis(available_at))
        .bind(to_millis(now))
        .bind(&claim.id)
        .bind(&claim.worker_id)
        .bind(i64::from(claim.attempt))
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to release task", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn expired_claims(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE state = 'processing' AND lease_expires_at <= ? \
                 ORDER BY created_at, id"
            ),
            to_millis(now),
            "Failed to list expired claims",
        )
        .await
    }

    async fn expirable_artifacts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE state = 'completed' AND artifact_expired_at IS NULL AND completed_at < ? \
                 ORDER BY created_at, id"
            ),
            to_millis(cutoff),
            "Failed to list expirable artifacts",
        )
        .await
    }

    async fn mark_artifact_expired(&self, id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let now_ms = to_millis(now);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET artifact_expired_at = ?, updated_at = ?
            WHERE id = ? AND state = 'completed' AND artifact_expired_at IS NULL
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark artifact expired", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE state IN ('completed', 'failed') AND completed_at < ? \
                 ORDER BY created_at, id"
            ),
            to_millis(cutoff),
            "Failed to list finished tasks",
        )
        .await
    }

    async fn remove(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to delete task", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_by_state(&self) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM tasks GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("Failed to count tasks", e))?;

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match TaskState::parse(&state) {
                Some(TaskState::Pending) => counts.pending += count,
                Some(TaskState::Processing) => counts.processing += count,
                Some(TaskState::Completed) => counts.completed += count,
                Some(TaskState::Failed) => counts.failed += count,
                None => tracing::warn!(state = %state, "Ignoring tasks with unknown state"),
            }
        }
        Ok(counts)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
