//! Lifecycle events published while a session is processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::SessionId;
use crate::session::SessionStatus;

pub const MSG_STARTED: &str = "analysis started";
pub const MSG_COMPLETED: &str = "analysis completed";
pub const MSG_FAILED: &str = "analysis failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(session_id: SessionId, status: SessionStatus, message: impl Into<String>) -> Self {
        Self {
            session_id,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn processing(session_id: SessionId) -> Self {
        Self::new(session_id, SessionStatus::Processing, MSG_STARTED)
    }

    pub fn completed(session_id: SessionId) -> Self {
        Self::new(session_id, SessionStatus::Completed, MSG_COMPLETED)
    }

    pub fn failed(session_id: SessionId) -> Self {
        Self::new(session_id, SessionStatus::Failed, MSG_FAILED)
    }

    /// Standard event for a status transition.
    pub fn for_status(session_id: SessionId, status: SessionStatus) -> Self {
        let message = match status {
            SessionStatus::Processing => MSG_STARTED,
            SessionStatus::Completed => MSG_COMPLETED,
            SessionStatus::Failed => MSG_FAILED,
            _ => "",
        };
        Self::new(session_id, status, message)
    }

    /// Topic routing key: `session.<id>`.
    pub fn routing_key(&self) -> String {
        format!("session.{}", self.session_id)
    }
}
