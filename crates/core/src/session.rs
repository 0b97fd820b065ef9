//! Session: one queued analysis job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{SessionId, UserId};

/// Lifecycle state of a session.
///
/// Queue producers send the status as a free string. Values outside the known
/// set are kept verbatim in [`SessionStatus::Other`] so they never make a
/// message undecodable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(raw) => raw,
        }
    }

    /// `completed` and `failed` are final; nothing resumes from them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<String> for SessionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Other(value),
        }
    }
}

impl From<SessionStatus> for String {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl core::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session as carried on the `sessions` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub job_description: String,
}

impl Session {
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        job_title: impl Into<String>,
        job_description: impl Into<String>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            name: name.into(),
            user_id,
            status: SessionStatus::Pending,
            job_title: job_title.into(),
            job_description: job_description.into(),
        }
    }

    /// Decode a queue message body.
    pub fn from_json(body: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(body).map_err(|e| DomainError::decode(e.to_string()))
    }

    /// Best-effort extraction of the `id` field from a body that failed to
    /// decode as a whole.
    pub fn recover_id(body: &[u8]) -> Option<SessionId> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value.get("id")?.as_str()?.parse().ok()
    }
}
