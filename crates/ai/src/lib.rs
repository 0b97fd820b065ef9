//! `matchwork-ai`
//!
//! Boundary to the external scoring model: the conversation contract, the
//! prompt text, verdict parsing, and the Gemini adapter. Nothing here touches
//! storage or queues.

pub mod gemini;
pub mod oracle;
pub mod prompt;
pub mod scripted;
pub mod verdict;

pub use gemini::{GeminiConfig, GeminiOracle};
pub use oracle::{
    Conversation, ConversationKey, OracleChunk, OracleError, OracleStream, ScoringOracle,
    final_text,
};
pub use prompt::{ANALYZER_INSTRUCTION, scoring_prompt};
pub use scripted::{Reply, ScriptedOracle};
pub use verdict::{parse_verdict, strip_code_fence};
