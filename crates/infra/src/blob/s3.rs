//! S3-compatible blob store (Cloudflare R2) backed by the `object_store` crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::instrument;

use super::{BlobError, BlobStore};
use crate::config::R2Settings;

#[derive(Debug, Clone)]
pub struct ObjectStoreBlobStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Bucket client for R2; R2 expects region `auto`.
    pub fn r2(settings: &R2Settings) -> Result<Self, BlobError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(settings.endpoint())
            .with_region("auto")
            .with_bucket_name(&settings.bucket)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .build()
            .map_err(|e| BlobError::Transport(format!("failed to build R2 client: {e}")))?;
        Ok(Self::new(Arc::new(store)))
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    #[instrument(skip(self), err)]
    async fn fetch(&self, key: &str) -> Result<Bytes, BlobError> {
        let location = Path::from(key);
        let result = self.store.get(&location).await.map_err(|e| map_err(key, e))?;
        result.bytes().await.map_err(|e| map_err(key, e))
    }
}

fn map_err(key: &str, e: object_store::Error) -> BlobError {
    match e {
        object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_owned()),
        other => BlobError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    #[tokio::test]
    async fn fetches_through_object_store() {
        let backend = Arc::new(InMemory::new());
        backend
            .put(&Path::from("uploads/cv.txt"), PutPayload::from_static(b"resume"))
            .await
            .unwrap();
        let blobs = ObjectStoreBlobStore::new(backend);

        assert_eq!(blobs.fetch("uploads/cv.txt").await.unwrap(), Bytes::from_static(b"resume"));
        assert!(matches!(blobs.fetch("uploads/missing.txt").await, Err(BlobError::NotFound(_))));
    }

    #[test]
    fn builds_r2_client() {
        let settings = R2Settings {
            account_id: "acct".into(),
            bucket: "resumes".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
        };
        assert!(ObjectStoreBlobStore::r2(&settings).is_ok());
    }
}
