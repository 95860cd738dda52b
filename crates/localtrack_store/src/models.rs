//! Row types and the derived-status rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a single media row. SUCCESS and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    Queued,
    Running,
    Success,
    Failed,
    Unknown,
}

impl MediaStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaStatus::Success | MediaStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaStatus::Queued => "QUEUED",
            MediaStatus::Running => "RUNNING",
            MediaStatus::Success => "SUCCESS",
            MediaStatus::Failed => "FAILED",
            MediaStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Kind of worker a job is scheduled onto. Only containerised workers exist
/// today; the column keeps the store forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Docker,
}

#[derive(Debug, Clone, FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    /// Container image reference that will run this job.
    pub engine: String,
    /// Object-store URI of the model artifact.
    pub model: String,
    pub args: Option<String>,
    pub metadata_b64: Option<String>,
    pub job_type: JobKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MediaRecord {
    pub id: i64,
    pub job_id: i64,
    /// Source video URL.
    pub name: String,
    pub status: MediaStatus,
    pub metadata_b64: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A job together with all of its media rows.
#[derive(Debug, Clone)]
pub struct JobWithMedia {
    pub job: JobRecord,
    pub media: Vec<MediaRecord>,
}

impl JobWithMedia {
    /// Effective status, derived from the media rows.
    pub fn status(&self) -> MediaStatus {
        derive_status(&self.media.iter().map(|m| m.status).collect::<Vec<_>>())
    }
}

/// The oldest queued media with an immutable snapshot of its parent job.
#[derive(Debug, Clone)]
pub struct QueuedMedia {
    pub media: MediaRecord,
    pub job: JobRecord,
}

/// Insert payload for a new job. Each video becomes one QUEUED media row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub engine: String,
    pub model: String,
    pub args: Option<String>,
    pub metadata_b64: Option<String>,
    pub videos: Vec<String>,
}

/// Derive a job's status from its media rows.
///
/// FAILED dominates, then RUNNING, then QUEUED; SUCCESS only when every
/// media succeeded. Anything else (including no media at all) is UNKNOWN.
pub fn derive_status(media: &[MediaStatus]) -> MediaStatus {
    if media.is_empty() {
        return MediaStatus::Unknown;
    }
    if media.iter().any(|s| *s == MediaStatus::Failed) {
        return MediaStatus::Failed;
    }
    if media.iter().any(|s| *s == MediaStatus::Running) {
        return MediaStatus::Running;
    }
    if media.iter().any(|s| *s == MediaStatus::Queued) {
        return MediaStatus::Queued;
    }
    if media.iter().all(|s| *s == MediaStatus::Success) {
        return MediaStatus::Success;
    }
    MediaStatus::Unknown
}
