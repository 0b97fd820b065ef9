//! Gemini adapter for [`ScoringOracle`] over the streaming REST API.
//!
//! Each conversation keeps its own turn history in memory and replays it on
//! every request, so follow-up prompts inside one session see earlier answers.
//! Responses are read as server-sent events (`alt=sse`); every `data:` line is
//! one partial `GenerateContentResponse`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::oracle::{
    Conversation, ConversationKey, OracleChunk, OracleError, OracleStream, ScoringOracle,
};
use crate::prompt::ANALYZER_INSTRUCTION;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub instruction: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            instruction: ANALYZER_INSTRUCTION.to_owned(),
            timeout: Duration::from_secs(180),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

impl core::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct GeminiOracle {
    http: reqwest::Client,
    config: Arc<GeminiConfig>,
}

impl GeminiOracle {
    pub fn new(config: GeminiConfig) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("matchwork/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Http(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl ScoringOracle for GeminiOracle {
    #[instrument(skip(self), fields(session_id = %key.session_id))]
    async fn open_conversation(
        &self,
        key: ConversationKey,
    ) -> Result<Box<dyn Conversation>, OracleError> {
        debug!(app = %key.app_name, model = %self.config.model, "opening conversation");
        Ok(Box::new(GeminiConversation {
            key,
            http: self.http.clone(),
            config: Arc::clone(&self.config),
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

struct GeminiConversation {
    key: ConversationKey,
    http: reqwest::Client,
    config: Arc<GeminiConfig>,
    history: Arc<Mutex<Vec<Content>>>,
}

#[async_trait]
impl Conversation for GeminiConversation {
    fn key(&self) -> &ConversationKey {
        &self.key
    }

    fn send(&self, prompt: String) -> OracleStream {
        let user_turn = Content::text("user", prompt);
        let mut contents = self.history.lock().unwrap_or_else(PoisonError::into_inner).clone();
        contents.push(user_turn.clone());

        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(&self.config.instruction)],
            },
            contents,
        };
        let call = self
            .http
            .post(self.config.stream_url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request);

        let history = Arc::clone(&self.history);
        sse_chunks(call)
            .map(move |item| {
                if let Ok(chunk) = &item {
                    if chunk.is_final {
                        let mut turns = history.lock().unwrap_or_else(PoisonError::into_inner);
                        turns.push(user_turn.clone());
                        turns.push(Content::text("model", chunk.text.clone()));
                    }
                }
                item
            })
            .boxed()
    }

    async fn close(&self) -> Result<(), OracleError> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        debug!(session_id = %self.key.session_id, "conversation closed");
        Ok(())
    }
}

fn sse_chunks(
    call: reqwest::RequestBuilder,
) -> impl Stream<Item = Result<OracleChunk, OracleError>> {
    try_stream! {
        let response = open_sse(call).await?;
        let mut body = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut answer = String::new();
        let mut finished = false;

        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(|e| OracleError::Stream(e.to_string()))?;
            pending.extend_from_slice(&bytes);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(frame) = parse_sse_line(&String::from_utf8_lossy(&line))? {
                    for chunk in frame.into_chunks(&mut answer, &mut finished) {
                        yield chunk;
                    }
                }
            }
        }
        if !pending.is_empty() {
            if let Some(frame) = parse_sse_line(&String::from_utf8_lossy(&pending))? {
                for chunk in frame.into_chunks(&mut answer, &mut finished) {
                    yield chunk;
                }
            }
        }
        if !finished && !answer.is_empty() {
            yield OracleChunk::final_text(answer);
        }
    }
}

async fn open_sse(call: reqwest::RequestBuilder) -> Result<reqwest::Response, OracleError> {
    let response = call.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OracleError::Status {
        status: status.as_u16(),
        body,
    })
}

/// One decoded `data:` event.
#[derive(Debug, PartialEq, Eq)]
struct Frame {
    text: String,
    finished: bool,
}

impl Frame {
    /// Partial chunk for the new text, plus the aggregated final chunk once
    /// the model reports a finish reason.
    fn into_chunks(self, answer: &mut String, finished: &mut bool) -> Vec<OracleChunk> {
        let mut out = Vec::with_capacity(2);
        if !self.text.is_empty() {
            answer.push_str(&self.text);
            out.push(OracleChunk::partial(self.text));
        }
        if self.finished && !*finished {
            *finished = true;
            out.push(OracleChunk::final_text(answer.clone()));
        }
        out
    }
}

fn parse_sse_line(line: &str) -> Result<Option<Frame>, OracleError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let response: GenerateResponse =
        serde_json::from_str(data).map_err(|e| OracleError::Decode(e.to_string()))?;
    if let Some(err) = response.error {
        return Err(OracleError::Stream(err.message));
    }
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(None);
    };
    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok(Some(Frame {
        text,
        finished: candidate.finish_reason.is_some(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_owned()),
            parts: vec![Part {
                text: Some(text.into()),
                thought: false,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "core::ops::Not::not")]
    thought: bool,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_owned()),
            thought: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_targets_model() {
        let cfg = GeminiConfig::new("k", "gemini-2.5-pro").with_base_url("http://localhost:9999/");
        assert_eq!(
            cfg.stream_url(),
            "http://localhost:9999/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn debug_hides_api_key() {
        let cfg = GeminiConfig::new("secret-key", DEFAULT_MODEL);
        assert!(!format!("{cfg:?}").contains("secret-key"));
    }

    #[test]
    fn parses_partial_and_final_frames() {
        let partial = parse_sse_line(
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"{\"match"}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            partial,
            Frame {
                text: "{\"match".into(),
                finished: false,
            }
        );

        let last = parse_sse_line(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"_score\":1}"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap()
        .unwrap();
        assert!(last.finished);

        let mut answer = String::new();
        let mut finished = false;
        let mut chunks = partial.into_chunks(&mut answer, &mut finished);
        chunks.extend(last.into_chunks(&mut answer, &mut finished));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], OracleChunk::final_text("{\"match_score\":1}"));
    }

    #[test]
    fn skips_non_data_lines_and_thoughts() {
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("").unwrap(), None);
        let frame = parse_sse_line(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"hmm","thought":true},{"text":"ok"}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(frame.text, "ok");
    }

    #[test]
    fn error_payload_is_a_stream_error() {
        let err = parse_sse_line(r#"data: {"error":{"code":429,"message":"quota"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "stream error: quota");
    }

    #[test]
    fn request_shape() {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::text("be terse")],
            },
            contents: vec![Content::text("user", "hi")],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be terse");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["contents"][0]["role"], "user");
        assert!(value["contents"][0]["parts"][0].get("thought").is_none());
    }

    #[tokio::test]
    async fn close_clears_history() {
        let oracle = GeminiOracle::new(GeminiConfig::new("k", DEFAULT_MODEL)).unwrap();
        let key = ConversationKey::new("resume analyzer", Default::default(), Default::default());
        let conversation = oracle.open_conversation(key.clone()).await.unwrap();
        assert_eq!(conversation.key(), &key);
        conversation.close().await.unwrap();
    }
}
