//! Scoring oracle contract.
//!
//! An oracle is an external model that reads a prompt and answers with a
//! verdict. Answers arrive as a stream of [`OracleChunk`]s; only the last
//! final chunk with non-empty text counts as the answer.
//!
//! Prompts are sent inside a [`Conversation`] opened for one session run. The
//! caller is responsible for closing it on every exit path.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use matchwork_core::{SessionId, UserId};
use thiserror::Error;

/// Scope of one oracle conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub app_name: String,
    pub user_id: UserId,
    pub session_id: SessionId,
}

impl ConversationKey {
    pub fn new(app_name: impl Into<String>, user_id: UserId, session_id: SessionId) -> Self {
        Self {
            app_name: app_name.into(),
            user_id,
            session_id,
        }
    }
}

/// One piece of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OracleChunk {
    pub text: String,
    /// Set on the chunk that carries the complete answer.
    pub is_final: bool,
}

impl OracleChunk {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

pub type OracleStream = BoxStream<'static, Result<OracleChunk, OracleError>>;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("http error: {0}")]
    Http(String),

    #[error("oracle returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("empty agent response")]
    EmptyResponse,

    #[error("conversation error: {0}")]
    Conversation(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Factory for conversations.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn open_conversation(
        &self,
        key: ConversationKey,
    ) -> Result<Box<dyn Conversation>, OracleError>;
}

#[async_trait]
pub trait Conversation: Send + Sync {
    fn key(&self) -> &ConversationKey;

    /// Submit a prompt; the returned stream yields the answer.
    fn send(&self, prompt: String) -> OracleStream;

    /// Release the conversation on the oracle side.
    async fn close(&self) -> Result<(), OracleError>;
}

#[async_trait]
impl<O> ScoringOracle for std::sync::Arc<O>
where
    O: ScoringOracle + ?Sized,
{
    async fn open_conversation(
        &self,
        key: ConversationKey,
    ) -> Result<Box<dyn Conversation>, OracleError> {
        (**self).open_conversation(key).await
    }
}

/// Drain a stream and keep the text of the last final, non-empty chunk.
///
/// The first stream error aborts the drain.
pub async fn final_text(mut stream: OracleStream) -> Result<String, OracleError> {
    let mut answer = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_final && !chunk.text.trim().is_empty() {
            answer = Some(chunk.text);
        }
    }
    answer.ok_or(OracleError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn boxed(items: Vec<Result<OracleChunk, OracleError>>) -> OracleStream {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn keeps_last_final_chunk() {
        let text = final_text(boxed(vec![
            Ok(OracleChunk::partial("{\"a\"")),
            Ok(OracleChunk::final_text("first")),
            Ok(OracleChunk::final_text("   ")),
            Ok(OracleChunk::final_text("second")),
        ]))
        .await
        .unwrap();
        assert_eq!(text, "second");
    }

    #[tokio::test]
    async fn partials_only_is_empty() {
        let err = final_text(boxed(vec![Ok(OracleChunk::partial("hi"))])).await.unwrap_err();
        assert!(matches!(err, OracleError::EmptyResponse));
    }

    #[tokio::test]
    async fn stops_on_first_error() {
        let err = final_text(boxed(vec![
            Ok(OracleChunk::final_text("early")),
            Err(OracleError::Stream("reset".into())),
            Ok(OracleChunk::final_text("never seen")),
        ]))
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "stream error: reset");
    }
}
