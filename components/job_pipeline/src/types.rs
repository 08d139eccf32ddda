use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use track_primitives::TrackInfo;

/// Opaque, caller-supplied job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle. `completed` and `error` are terminal; `error` is
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Searching,
    Downloading,
    Processing,
    Tagging,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// One structured progress sample, delivered at-most-once per
/// transition to the job's subscribers and session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: JobId,
    pub track_id: String,
    pub status: JobStatus,
    pub message: String,
    pub progress: u8,
}

/// The orchestrator's record of one submitted download.
///
/// Mutated exclusively by the orchestrator; callers receive snapshots.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: JobId,
    pub track: TrackInfo,
    pub session_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    /// Set only once the job completes
    pub output_path: Option<PathBuf>,
    /// Set only once the job fails
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
