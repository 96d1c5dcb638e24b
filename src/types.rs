//! Core types for convertd

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Unique identifier for a conversion task
///
/// Generated as a hyphenated UUID v4 at submission and never reused. Clients
/// must treat it as an opaque string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task lifecycle state
///
/// `pending -> processing -> completed | failed`. A processing task whose
/// claim expired goes back to `pending`; terminal states never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker
    Processing,
    /// Artifact available
    Completed,
    /// Conversion failed permanently
    Failed,
}

impl TaskState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Lower-case name used on the wire and in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// Parse the lower-case name back into a state
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskState::Pending),
            "processing" => Some(TaskState::Processing),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended in the `failed` state
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize, ToSchema)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum TaskFailure {
    /// No converter is registered for the format pair
    #[error("no converter available for {source_format} -> {target_format}")]
    UnsupportedConversion {
        /// Source format of the task
        source_format: String,
        /// Requested target format
        target_format: String,
    },

    /// The converter rejected the input
    #[error("conversion failed: {message}")]
    ConversionFailed {
        /// Converter-provided reason
        message: String,
    },

    /// Every allowed attempt failed or timed out
    #[error("conversion failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Number of claims that were made
        attempts: u32,
        /// Cause of the final failed attempt
        last_error: String,
    },
}

impl TaskFailure {
    /// Machine-readable failure code
    pub fn code(&self) -> &'static str {
        match self {
            TaskFailure::UnsupportedConversion { .. } => "unsupported_conversion",
            TaskFailure::ConversionFailed { .. } => "conversion_failed",
            TaskFailure::MaxRetriesExceeded { .. } => "max_retries_exceeded",
        }
    }
}

/// A worker's time-bounded hold on a processing task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Worker holding the claim
    pub worker_id: String,
    /// When the claim was taken
    pub claimed_at: DateTime<Utc>,
    /// After this instant the reaper may take the task back
    pub lease_expires_at: DateTime<Utc>,
}

/// Proof of a claim, required for every transition out of `processing`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimToken {
    /// Claimed task
    pub id: TaskId,
    /// Worker that made the claim
    pub worker_id: String,
    /// Attempt number the claim was made for
    pub attempt: u32,
}

/// Conversion task record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Normalized source format (e.g. "jpg")
    pub source_format: String,
    /// Normalized target format (e.g. "png")
    pub target_format: String,
    /// Current state
    pub state: TaskState,
    /// Filename supplied with the upload
    pub original_filename: Option<String>,
    /// Upload size in bytes
    pub input_size: u64,
    /// Number of times the task has been claimed
    pub attempts: u32,
    /// Present while processing
    pub claim: Option<Claim>,
    /// Set once the task failed
    pub error: Option<TaskFailure>,
    /// Set once the task completed (`{id}.{target_format}`)
    pub artifact_ref: Option<String>,
    /// Set once the retention sweeper deleted the artifact
    pub artifact_expired_at: Option<DateTime<Utc>>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Earliest time the task may be claimed
    pub available_at: DateTime<Utc>,
    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a freshly submitted task
    pub fn new_pending(
        id: TaskId,
        source_format: impl Into<String>,
        target_format: impl Into<String>,
        original_filename: Option<String>,
        input_size: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_format: source_format.into(),
            target_format: target_format.into(),
            state: TaskState::Pending,
            original_filename,
            input_size,
            attempts: 0,
            claim: None,
            error: None,
            artifact_ref: None,
            artifact_expired_at: None,
            created_at: now,
            updated_at: now,
            available_at: now,
            completed_at: None,
        }
    }

    /// Blob key of the uploaded input
    pub fn input_key(&self) -> String {
        format!("inputs/{}.{}", self.id, self.source_format)
    }

    /// Artifact reference this task produces on success
    pub fn artifact_ref_for(&self) -> String {
        format!("{}.{}", self.id, self.target_format)
    }

    /// Token for the current claim, if the task is processing
    pub fn claim_token(&self) -> Option<ClaimToken> {
        let claim = self.claim.as_ref()?;
        Some(ClaimToken {
            id: self.id.clone(),
            worker_id: claim.worker_id.clone(),
            attempt: self.attempts,
        })
    }

    /// Whether the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Blob key of an artifact
pub fn artifact_key(artifact_ref: &str) -> String {
    format!("artifacts/{artifact_ref}")
}

/// Client-facing view of a task
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskStatus {
    /// Task identifier
    pub id: TaskId,
    /// Current state
    pub status: TaskState,
    /// Where to fetch the artifact (completed tasks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Human-readable failure (failed tasks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure code (failed tasks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Source format
    pub source_format: String,
    /// Target format
    pub target_format: String,
    /// Number of attempts made so far
    pub attempts: u32,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// When the task finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Number of tasks per state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StateCounts {
    /// Waiting for a worker
    pub pending: u64,
    /// Claimed by a worker
    pub processing: u64,
    /// Finished successfully
    pub completed: u64,
    /// Finished with an error
    pub failed: u64,
}

impl StateCounts {
    /// Increment the counter for a state
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Processing => self.processing += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
        }
    }
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted and waiting for a worker
    Queued {
        /// Task ID
        id: TaskId,
        /// Source format
        source_format: String,
        /// Target format
        target_format: String,
    },

    /// Task claimed by a worker
    Processing {
        /// Task ID
        id: TaskId,
        /// Worker that claimed it
        worker_id: String,
        /// Attempt number (1-based)
        attempt: u32,
    },

    /// Attempt failed and the task went back to pending
    Requeued {
        /// Task ID
        id: TaskId,
        /// Attempt that failed
        attempt: u32,
        /// Cause of the failed attempt
        reason: String,
        /// Earliest time of the next attempt
        retry_at: DateTime<Utc>,
    },

    /// Artifact ready for download
    Completed {
        /// Task ID
        id: TaskId,
        /// Artifact reference
        artifact_ref: String,
    },

    /// Task failed permanently
    Failed {
        /// Task ID
        id: TaskId,
        /// Machine-readable failure code
        code: String,
        /// Human-readable failure
        error: String,
    },

    /// Retention removed the artifact
    ArtifactExpired {
        /// Task ID
        id: TaskId,
    },

    /// Service is shutting down
    Shutdown,
}
