//! Persistence for sessions, their documents and analysis results.

pub mod postgres;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use matchwork_core::{DocumentRef, SessionId, SessionStatus};
use thiserror::Error;

pub use self::postgres::PostgresSessionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Session-side persistence used by the pipeline.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Documents attached to a session, in stable upload order.
    async fn documents_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<DocumentRef>, StoreError>;

    /// Overwrite the session's `status` column.
    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: &SessionStatus,
    ) -> Result<(), StoreError>;

    /// Insert or replace the session's aggregated results.
    async fn upsert_results(
        &self,
        session_id: SessionId,
        results: &serde_json::Value,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    async fn documents_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<DocumentRef>, StoreError> {
        (**self).documents_for_session(session_id).await
    }

    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: &SessionStatus,
    ) -> Result<(), StoreError> {
        (**self).update_session_status(session_id, status).await
    }

    async fn upsert_results(
        &self,
        session_id: SessionId,
        results: &serde_json::Value,
    ) -> Result<(), StoreError> {
        (**self).upsert_results(session_id, results).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<SessionId, Vec<DocumentRef>>,
    statuses: HashMap<SessionId, Vec<SessionStatus>>,
    results: HashMap<SessionId, serde_json::Value>,
    fail_documents: Option<String>,
    fail_upserts: usize,
    fail_status: bool,
}

/// In-memory session store for tests/dev.
///
/// Keeps every status written per session so tests can assert on the full
/// transition history.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    state: Mutex<MemoryState>,
    upsert_calls: AtomicUsize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&self, doc: DocumentRef) {
        self.lock().documents.entry(doc.session_id).or_default().push(doc);
    }

    /// Every document load fails with `msg`.
    pub fn fail_documents(&self, msg: impl Into<String>) {
        self.lock().fail_documents = Some(msg.into());
    }

    /// The next `times` upserts fail.
    pub fn fail_upserts(&self, times: usize) {
        self.lock().fail_upserts = times;
    }

    pub fn fail_status_updates(&self) {
        self.lock().fail_status = true;
    }

    pub fn status_history(&self, session_id: SessionId) -> Vec<SessionStatus> {
        self.lock().statuses.get(&session_id).cloned().unwrap_or_default()
    }

    pub fn results(&self, session_id: SessionId) -> Option<serde_json::Value> {
        self.lock().results.get(&session_id).cloned()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn documents_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<DocumentRef>, StoreError> {
        let state = self.lock();
        if let Some(msg) = &state.fail_documents {
            return Err(StoreError::Unavailable(msg.clone()));
        }
        Ok(state.documents.get(&session_id).cloned().unwrap_or_default())
    }

    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: &SessionStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.fail_status {
            return Err(StoreError::Unavailable("status update refused".into()));
        }
        state.statuses.entry(session_id).or_default().push(status.clone());
        Ok(())
    }

    async fn upsert_results(
        &self,
        session_id: SessionId,
        results: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.fail_upserts > 0 {
            state.fail_upserts -= 1;
            return Err(StoreError::Unavailable("upsert refused".into()));
        }
        state.results.insert(session_id, results.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn documents_keep_insertion_order() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        store.add_document(DocumentRef::new(session, "a.pdf", "application/pdf"));
        store.add_document(DocumentRef::new(session, "b.txt", "text/plain"));
        store.add_document(DocumentRef::new(SessionId::new(), "other.txt", "text/plain"));

        let docs = store.documents_for_session(session).await.unwrap();
        let keys: Vec<_> = docs.iter().map(|d| d.object_key.as_str()).collect();
        assert_eq!(keys, ["a.pdf", "b.txt"]);
    }

    #[tokio::test]
    async fn upsert_replaces_and_counts_failures() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        store.fail_upserts(1);

        assert!(store.upsert_results(session, &json!([1])).await.is_err());
        store.upsert_results(session, &json!([1])).await.unwrap();
        store.upsert_results(session, &json!([2])).await.unwrap();

        assert_eq!(store.results(session), Some(json!([2])));
        assert_eq!(store.upsert_calls(), 3);
    }

    #[tokio::test]
    async fn status_history_is_recorded() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        store.update_session_status(session, &SessionStatus::Processing).await.unwrap();
        store.update_session_status(session, &SessionStatus::Completed).await.unwrap();
        assert_eq!(
            store.status_history(session),
            vec![SessionStatus::Processing, SessionStatus::Completed]
        );
    }
}
