//! Scripted oracle for tests/dev.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::{StreamExt, stream};

use crate::oracle::{
    Conversation, ConversationKey, OracleChunk, OracleError, OracleStream, ScoringOracle,
};

/// A canned answer for one `send`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Streamed as one partial chunk followed by the final chunk.
    Text(String),
    /// Exact chunk sequence.
    Chunks(Vec<OracleChunk>),
    /// The stream fails with this message.
    Error(String),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    fn into_stream(self) -> OracleStream {
        let items: Vec<Result<OracleChunk, OracleError>> = match self {
            Reply::Text(text) => vec![
                Ok(OracleChunk::partial(text.clone())),
                Ok(OracleChunk::final_text(text)),
            ],
            Reply::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            Reply::Error(msg) => vec![Err(OracleError::Stream(msg))],
        };
        stream::iter(items).boxed()
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
    fail_open: Option<String>,
    fail_close: bool,
    prompts: Vec<String>,
    opened: Vec<ConversationKey>,
    closed: Vec<ConversationKey>,
}

/// Oracle that answers from a queue of [`Reply`]s and records every call.
///
/// When the queue is empty the fallback reply (if any) is used; otherwise the
/// stream is empty, which reads as an empty response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.lock().replies.push_back(reply);
        self
    }

    pub fn fallback(self, reply: Reply) -> Self {
        self.lock().fallback = Some(reply);
        self
    }

    pub fn fail_open(self, msg: impl Into<String>) -> Self {
        self.lock().fail_open = Some(msg.into());
        self
    }

    pub fn fail_close(self) -> Self {
        self.lock().fail_close = true;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn opened(&self) -> Vec<ConversationKey> {
        self.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<ConversationKey> {
        self.lock().closed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScoringOracle for ScriptedOracle {
    async fn open_conversation(
        &self,
        key: ConversationKey,
    ) -> Result<Box<dyn Conversation>, OracleError> {
        let mut script = self.lock();
        if let Some(msg) = &script.fail_open {
            return Err(OracleError::Conversation(msg.clone()));
        }
        script.opened.push(key.clone());
        Ok(Box::new(ScriptedConversation {
            key,
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedConversation {
    key: ConversationKey,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Conversation for ScriptedConversation {
    fn key(&self) -> &ConversationKey {
        &self.key
    }

    fn send(&self, prompt: String) -> OracleStream {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.prompts.push(prompt);
        match script.replies.pop_front().or_else(|| script.fallback.clone()) {
            Some(reply) => reply.into_stream(),
            None => stream::empty().boxed(),
        }
    }

    async fn close(&self) -> Result<(), OracleError> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.closed.push(self.key.clone());
        if script.fail_close {
            return Err(OracleError::Conversation("close refused".into()));
        }
        Ok(())
    }
}
