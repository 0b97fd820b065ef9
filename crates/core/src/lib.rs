//! `matchwork-core`: the data model shared by every matchwork crate.
//!
//! Pure types only (no I/O): sessions, document references, verdicts and
//! lifecycle events.

pub mod document;
pub mod error;
pub mod id;
pub mod session;
pub mod status;
pub mod verdict;

pub use document::{DocumentRef, mime_essence};
pub use error::{DomainError, DomainResult};
pub use id::{DocumentId, SessionId, UserId};
pub use session::{Session, SessionStatus};
pub use status::StatusEvent;
pub use verdict::{DocumentVerdict, SessionResultSet, Verdict};
