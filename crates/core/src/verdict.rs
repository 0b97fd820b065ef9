//! Per-document verdicts and the per-session result set.

use serde::{Deserialize, Deserializer, Serialize};

use crate::id::SessionId;

/// Structured verdict returned by the scoring oracle for one document.
///
/// Every field tolerates absence and `null`; oracle output is loosely shaped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default, deserialize_with = "null_as_default")]
    pub candidate_email: String,
    /// Not clamped; whatever the oracle produced.
    #[serde(default, deserialize_with = "null_as_default")]
    pub match_score: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relevant_experiences: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relevant_skills: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub missing_skills: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendation: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome for one document: a verdict, or the reason there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "VerdictRecord", from = "VerdictRecord")]
pub enum DocumentVerdict {
    Scored(Verdict),
    Failed { error: String },
}

impl DocumentVerdict {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Scored(verdict) => Some(verdict),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Scored(_) => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Flat wire shape stored in `analyses_results.results`.
#[derive(Serialize, Deserialize)]
struct VerdictRecord {
    #[serde(flatten)]
    verdict: Verdict,
    #[serde(default)]
    is_error_result: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    error: String,
}

impl From<DocumentVerdict> for VerdictRecord {
    fn from(value: DocumentVerdict) -> Self {
        match value {
            DocumentVerdict::Scored(verdict) => Self {
                verdict,
                is_error_result: false,
                error: String::new(),
            },
            DocumentVerdict::Failed { error } => Self {
                verdict: Verdict::default(),
                is_error_result: true,
                error,
            },
        }
    }
}

impl From<VerdictRecord> for DocumentVerdict {
    fn from(value: VerdictRecord) -> Self {
        if value.is_error_result {
            Self::Failed { error: value.error }
        } else {
            Self::Scored(value.verdict)
        }
    }
}

/// Ordered outcomes for every document of one session run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResultSet {
    pub session_id: SessionId,
    results: Vec<DocumentVerdict>,
}

impl SessionResultSet {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            results: Vec::new(),
        }
    }

    pub fn with_capacity(session_id: SessionId, capacity: usize) -> Self {
        Self {
            session_id,
            results: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, verdict: DocumentVerdict) {
        self.results.push(verdict);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[DocumentVerdict] {
        &self.results
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }

    /// The persisted form: a JSON array of verdict objects.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.results)
    }
}
