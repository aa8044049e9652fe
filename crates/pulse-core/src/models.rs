//! Intake, memory and worker statistics models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// INTAKE
// =============================================================================

/// Lifecycle state of an intake.
///
/// `Initialized`, `Uploading` and `Ready` are set by the upload collaborators;
/// the worker owns every transition out of `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    Initialized,
    Uploading,
    Ready,
    Processing,
    Done,
    FailedMaxAttempts,
}

impl IntakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeStatus::Initialized => "initialized",
            IntakeStatus::Uploading => "uploading",
            IntakeStatus::Ready => "ready",
            IntakeStatus::Processing => "processing",
            IntakeStatus::Done => "done",
            IntakeStatus::FailedMaxAttempts => "failed_max_attempts",
        }
    }

    /// Terminal states never leave on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntakeStatus::Done | IntakeStatus::FailedMaxAttempts)
    }
}

impl std::fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntakeStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(IntakeStatus::Initialized),
            "uploading" => Ok(IntakeStatus::Uploading),
            "ready" => Ok(IntakeStatus::Ready),
            "processing" => Ok(IntakeStatus::Processing),
            "done" => Ok(IntakeStatus::Done),
            "failed_max_attempts" => Ok(IntakeStatus::FailedMaxAttempts),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown intake status '{}'",
                other
            ))),
        }
    }
}

/// A tenant document awaiting or undergoing processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intake {
    pub id: Uuid,
    pub org_id: String,
    pub status: IntakeStatus,
    /// Directory (or object) path inside the content bucket.
    pub storage_path: String,
    /// Hex MD5 of the uploaded bytes.
    pub checksum: Option<String>,
    pub size_bytes: Option<i64>,
    pub idempotency_key: Uuid,
    pub attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register an intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIntake {
    pub org_id: String,
    pub storage_path: String,
    pub checksum: Option<String>,
    pub size_bytes: Option<i64>,
    pub idempotency_key: Uuid,
    /// Initial status; uploads that arrive complete start as `Ready`.
    pub status: IntakeStatus,
}

impl NewIntake {
    /// A fully uploaded intake, immediately eligible for processing.
    pub fn ready(org_id: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            storage_path: storage_path.into(),
            checksum: None,
            size_bytes: None,
            idempotency_key: Uuid::new_v4(),
            status: IntakeStatus::Ready,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_size(mut self, size_bytes: i64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    pub fn with_idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = key;
        self
    }
}

/// Partial status update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub error: Option<String>,
    pub attempts: Option<i32>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

// =============================================================================
// MEMORY
// =============================================================================

/// Derived record written once per successfully processed intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub intake_id: Uuid,
    pub org_id: String,
    pub title: String,
    pub summary: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Request to create a memory for an intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryRequest {
    pub intake_id: Uuid,
    pub org_id: String,
    pub title: String,
    pub summary: String,
    pub metadata: serde_json::Value,
}

// =============================================================================
// WORKER STATISTICS
// =============================================================================

/// Intake counts used for worker status and periodic stats logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeStats {
    pub ready: i64,
    pub processing: i64,
    pub done: i64,
    pub failed_max_attempts: i64,
    /// Intakes with a `last_error` updated inside the recent-error window.
    pub recent_errors: i64,
    pub total_memories: i64,
}
