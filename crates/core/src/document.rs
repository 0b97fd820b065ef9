//! Document references loaded from the store for a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DocumentId, SessionId};

/// One uploaded document attached to a session.
///
/// Read-only input to the pipeline; only `object_key` and `mime` drive processing,
/// the remaining columns are carried for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub session_id: SessionId,
    pub original_filename: String,
    pub mime: String,
    pub size_bytes: i64,
    pub storage_provider: String,
    pub object_key: String,
    pub storage_url: String,
    pub upload_status: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentRef {
    pub fn new(
        session_id: SessionId,
        object_key: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        let object_key = object_key.into();
        Self {
            id: DocumentId::new(),
            session_id,
            original_filename: object_key.rsplit('/').next().unwrap_or_default().to_owned(),
            mime: mime.into(),
            size_bytes: 0,
            storage_provider: "r2".to_owned(),
            storage_url: String::new(),
            upload_status: "uploaded".to_owned(),
            object_key,
            created_at: Utc::now(),
        }
    }
}

/// MIME type without parameters, lowercased (`text/plain; charset=utf-8` -> `text/plain`).
pub fn mime_essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}
