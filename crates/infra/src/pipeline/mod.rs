//! Session pipeline: everything that happens to one session after it is
//! taken off the queue.
//!
//! ```text
//! load documents ─▶ open conversation ─▶ for each document:
//!                                          fetch (retried)
//!                                          decode
//!                                          score (retried)
//!                                          record
//!                  ─▶ close conversation ─▶ upsert results (retried)
//! ```
//!
//! Failing to load the document list, to open the conversation, or to
//! persist the results fails the whole run. Any per-document failure only
//! turns that document's entry into an error entry; the result set always
//! has one entry per document, in document order.

pub mod aggregator;
pub mod conversation;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use matchwork_ai::{
    Conversation, ConversationKey, OracleError, ScoringOracle, final_text, scoring_prompt,
};
use matchwork_core::{DocumentRef, Session, SessionId, SessionResultSet};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::blob::BlobStore;
use crate::decode::DocumentDecoder;
use crate::retry::{RetryError, RetryPolicy, retry};
use crate::store::{SessionStore, StoreError};

pub use self::conversation::ConversationGuard;
pub use self::status::StatusReporter;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Application name used to scope oracle conversations.
    pub app_name: String,
    pub fetch_retry: RetryPolicy,
    pub oracle_retry: RetryPolicy,
    pub persist_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let base = Duration::from_millis(500);
        Self {
            app_name: "resume analyzer".to_owned(),
            fetch_retry: RetryPolicy::linear(3, base),
            oracle_retry: RetryPolicy::linear(2, base),
            persist_retry: RetryPolicy::linear(3, base),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load documents: {0}")]
    LoadDocuments(#[source] StoreError),

    #[error("failed to open oracle conversation: {0}")]
    OpenConversation(#[source] OracleError),

    #[error("failed to serialize results: {0}")]
    Serialize(String),

    #[error("failed to persist results: {0}")]
    Persist(#[source] RetryError<StoreError>),
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub results: SessionResultSet,
}

impl SessionReport {
    pub fn documents(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> usize {
        self.results.failures()
    }
}

#[derive(Clone)]
pub struct SessionPipeline {
    blobs: Arc<dyn BlobStore>,
    decoder: Arc<dyn DocumentDecoder>,
    oracle: Arc<dyn ScoringOracle>,
    store: Arc<dyn SessionStore>,
    config: PipelineConfig,
}

impl SessionPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        decoder: Arc<dyn DocumentDecoder>,
        oracle: Arc<dyn ScoringOracle>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            blobs,
            decoder,
            oracle,
            store,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every document of `session` and persist the aggregate.
    #[instrument(skip_all, fields(session_id = %session.id))]
    pub async fn process(&self, session: &Session) -> Result<SessionReport, PipelineError> {
        let documents = self
            .store
            .documents_for_session(session.id)
            .await
            .map_err(PipelineError::LoadDocuments)?;
        info!(documents = documents.len(), "processing session");

        let key = ConversationKey::new(self.config.app_name.clone(), session.user_id, session.id);
        let guard = ConversationGuard::new(
            self.oracle
                .open_conversation(key)
                .await
                .map_err(PipelineError::OpenConversation)?,
        );

        let mut results = SessionResultSet::with_capacity(session.id, documents.len());
        for doc in &documents {
            self.process_document(session, doc, guard.conversation(), &mut results).await;
        }
        guard.close().await;

        let payload = results.to_json().map_err(|e| PipelineError::Serialize(e.to_string()))?;
        retry(&self.config.persist_retry, || self.store.upsert_results(session.id, &payload))
            .await
            .map_err(PipelineError::Persist)?;

        info!(documents = results.len(), failures = results.failures(), "session results stored");
        Ok(SessionReport {
            session_id: session.id,
            results,
        })
    }

    async fn process_document(
        &self,
        session: &Session,
        doc: &DocumentRef,
        conversation: &dyn Conversation,
        results: &mut SessionResultSet,
    ) {
        let fetched = retry(&self.config.fetch_retry, || self.blobs.fetch(&doc.object_key)).await;
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(object_key = %doc.object_key, error = %e, "download failed");
                aggregator::record(results, "", true, Some(&format!("file download error: {e}")));
                return;
            }
        };

        let text = match self.decode(doc, bytes).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    object_key = %doc.object_key,
                    mime = %doc.mime,
                    error = %e,
                    "text extraction failed"
                );
                aggregator::record(results, "", true, Some(&format!("text extraction error: {e}")));
                return;
            }
        };

        let prompt = scoring_prompt(&session.job_title, &session.job_description, &text);
        let answer = retry(&self.config.oracle_retry, || {
            final_text(conversation.send(prompt.clone()))
        })
        .await;
        match answer {
            Ok(answer) => {
                debug!(object_key = %doc.object_key, "verdict received");
                aggregator::record(results, &answer, false, None);
            }
            Err(e) => {
                warn!(object_key = %doc.object_key, error = %e, "oracle failed");
                aggregator::record(results, "", true, Some(&format!("agent stream error: {e}")));
            }
        }
    }

    /// Decoding is CPU-bound; keep it off the async workers.
    async fn decode(&self, doc: &DocumentRef, bytes: Bytes) -> Result<String, String> {
        let decoder = Arc::clone(&self.decoder);
        let mime = doc.mime.clone();
        match tokio::task::spawn_blocking(move || decoder.decode(&mime, &bytes)).await {
            Ok(decoded) => decoded.map_err(|e| e.to_string()),
            Err(join) => Err(format!("decoder task failed: {join}")),
        }
    }
}
