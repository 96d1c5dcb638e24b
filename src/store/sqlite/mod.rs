//! SQLite task store
//!
//! ## Submodules
//!
//! - [`migrations`] - Connection setup and schema migrations
//! - [`tasks`] - The [`TaskStore`](super::TaskStore) implementation
//!
//! Timestamps are stored as Unix milliseconds. The claim is a single
//! `UPDATE ... RETURNING` statement, which SQLite executes atomically.

use crate::error::DatabaseError;
use crate::types::{Claim, Task, TaskFailure, TaskId, TaskState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;

mod migrations;
mod tasks;

/// Task store backed by a SQLite database
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

/// Column list shared by every query that reads whole tasks
const TASK_COLUMNS: &str = "id, source_format, target_format, state, original_filename, \
     input_size, attempts, worker_id, claimed_at, lease_expires_at, error_json, artifact_ref, \
     artifact_expired_at, created_at, updated_at, available_at, completed_at";

/// Task row as stored in the database
#[derive(Debug, Clone, FromRow)]
struct TaskRow {
    id: TaskId,
    source_format: String,
    target_format: String,
    state: String,
    original_filename: Option<String>,
    input_size: i64,
    attempts: i64,
    worker_id: Option<String>,
    claimed_at: Option<i64>,
    lease_expires_at: Option<i64>,
    error_json: Option<String>,
    artifact_ref: Option<String>,
    artifact_expired_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    available_at: i64,
    completed_at: Option<i64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let state = TaskState::parse(&row.state).ok_or_else(|| {
            corrupt(format!("task {} has unknown state '{}'", row.id, row.state))
        })?;

        let claim = match (row.worker_id, row.claimed_at, row.lease_expires_at) {
            (Some(worker_id), Some(claimed_at), Some(lease_expires_at)) => Some(Claim {
                worker_id,
                claimed_at: from_millis(claimed_at)?,
                lease_expires_at: from_millis(lease_expires_at)?,
            }),
            _ => None,
        };

        let error = row
            .error_json
            .as_deref()
            .map(serde_json::from_str::<TaskFailure>)
            .transpose()
            .map_err(|e| corrupt(format!("task {} has unreadable error: {}", row.id, e)))?;

        Ok(Task {
            state,
            source_format: row.source_format,
            target_format: row.target_format,
            original_filename: row.original_filename,
            input_size: u64::try_from(row.input_size).unwrap_or(0),
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            claim,
            error,
            artifact_ref: row.artifact_ref,
            artifact_expired_at: row.artifact_expired_at.map(from_millis).transpose()?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            available_at: from_millis(row.available_at)?,
            completed_at: row.completed_at.map(from_millis).transpose()?,
            id: row.id,
        })
    }
}

fn corrupt(message: String) -> Error {
    Error::Database(DatabaseError::CorruptRecord(message))
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(format!("timestamp {millis} is out of range")))
}

fn query_failed(context: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{context}: {e}")))
}
