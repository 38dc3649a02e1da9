use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Unique, time-sortable job identifier (UUID v7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a stored job.
///
/// Persisted as a small integer so the status index stays compact.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum JobStatus {
    /// Waiting to be claimed once `scheduled_for` has passed.
    Queued = 1,
    /// Claimed by a worker and not yet completed or failed.
    Running = 2,
    /// Retries exhausted. Terminal.
    Failed = 3,
}

impl JobStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed)
    }

    /// Status a job moves to after a failure brings its counter to
    /// `failed_attempts`.
    pub fn after_failure(failed_attempts: u32, max_attempts: u32) -> Self {
        if failed_attempts < max_attempts {
            JobStatus::Queued
        } else {
            JobStatus::Failed
        }
    }
}

impl TryFrom<i16> for JobStatus {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JobStatus::Queued),
            2 => Ok(JobStatus::Running),
            3 => Ok(JobStatus::Failed),
            other => Err(other),
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job exactly as the store holds it, payload still encoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub failed_attempts: u32,
    pub status: JobStatus,
    pub message_type: String,
    pub message: serde_json::Value,
}

impl JobRow {
    /// Build a fresh `Queued` row stamped with `now`.
    pub fn queued(
        message_type: impl Into<String>,
        message: serde_json::Value,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            created_at: now,
            updated_at: now,
            scheduled_for,
            failed_attempts: 0,
            status: JobStatus::Queued,
            message_type: message_type.into(),
            message,
        }
    }

    /// Whether a claim at `now` may pick this row up.
    pub fn is_claimable(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.status == JobStatus::Queued
            && self.scheduled_for <= now
            && self.failed_attempts < max_attempts
    }
}

/// A claimed job with its message decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Job<M> {
    pub id: JobId,
    pub message: M,
    pub status: JobStatus,
    pub failed_attempts: u32,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl<M> Job<M> {
    /// Attempt number of the current execution, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.failed_attempts + 1
    }
}
