//! Blob store: fetch uploaded document bytes by object key.

pub mod s3;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use self::s3::ObjectStoreBlobStore;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("blob transport error: {0}")]
    Transport(String),
}

/// Read side of the document bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Bytes, BlobError>;
}

#[async_trait]
impl<B> BlobStore for Arc<B>
where
    B: BlobStore + ?Sized,
{
    async fn fetch(&self, key: &str) -> Result<Bytes, BlobError> {
        (**self).fetch(key).await
    }
}

/// In-memory blob store for tests/dev.
///
/// Failures can be queued per key; each fetch of that key consumes one queued
/// failure before the stored bytes are served.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, VecDeque<String>>>,
    fetches: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), bytes.into());
    }

    /// Make the next `times` fetches of `key` fail with a transport error.
    pub fn fail_next(&self, key: impl Into<String>, times: usize, msg: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = failures.entry(key.into()).or_default();
        queue.extend(std::iter::repeat_n(msg.to_owned(), times));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch(&self, key: &str) -> Result<Bytes, BlobError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        if let Some(msg) = injected {
            return Err(BlobError::Transport(msg));
        }
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_owned()))
    }
}
