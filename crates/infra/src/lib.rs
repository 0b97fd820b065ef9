//! Infrastructure layer: storage, queues, document decoding, and the
//! session pipeline that ties them to the scoring oracle.

pub mod blob;
pub mod config;
pub mod decode;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use blob::{BlobError, BlobStore, InMemoryBlobStore, ObjectStoreBlobStore};
pub use self::config::{ConfigError, R2Settings, WorkerSettings};
pub use decode::{DecodeError, DocumentDecoder, MimeDecoder};
pub use pipeline::{PipelineConfig, PipelineError, SessionPipeline, SessionReport, StatusReporter};
pub use queue::{AckMode, Delivery, MessageSource, QueueError};
pub use retry::{RetryError, RetryPolicy, retry};
pub use store::{InMemorySessionStore, PostgresSessionStore, SessionStore, StoreError};
pub use workers::{DeliveryOutcome, WorkerContext, WorkerPool, WorkerPoolHandle};
