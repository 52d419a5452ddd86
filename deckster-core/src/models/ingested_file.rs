use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Indexed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "indexed" => Ok(FileStatus::Indexed),
            "failed" => Ok(FileStatus::Failed),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedFile {
    pub file_id: Uuid,
    pub session_id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub size_bytes: u64,
    pub media_type: String,
    /// Provider document handle; present iff `status == Indexed`.
    pub external_uri: Option<String>,
    pub status: FileStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestedFile {
    pub fn is_indexed(&self) -> bool {
        self.status == FileStatus::Indexed
    }

    /// Whether this record occupies one of the session's file slots.
    ///
    /// Failed records never do. Pending records stop counting once they are
    /// older than `stale_after` (the attempt that owned them is gone).
    pub fn holds_slot(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        match self.status {
            FileStatus::Indexed => true,
            FileStatus::Pending => now - self.created_at < stale_after,
            FileStatus::Failed => false,
        }
    }
}

/// Metadata for a submission, before a record id is assigned.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub session_id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub size_bytes: u64,
    pub media_type: String,
}

impl NewFile {
    pub fn into_pending(self, now: DateTime<Utc>) -> IngestedFile {
        IngestedFile {
            file_id: Uuid::new_v4(),
            session_id: self.session_id,
            user_id: self.user_id,
            name: self.name,
            size_bytes: self.size_bytes,
            media_type: self.media_type,
            external_uri: None,
            status: FileStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
