//! Postgres-backed session store.
//!
//! Tables (owned by the upload service, read and written here):
//!
//! - `resumes`: one row per uploaded document, keyed by `session_id`
//! - `sessions`: the `status` column is overwritten on every transition
//! - `analyses_results`: one row per session (`session_id` unique), `results` JSONB
//!
//! All queries go through the shared `PgPool`; the store is cheap to clone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matchwork_core::{DocumentId, DocumentRef, SessionId, SessionStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};

use super::{SessionStore, StoreError};

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool and check that the database answers.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self), fields(document_count = tracing::field::Empty), err)]
    async fn documents_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<DocumentRef>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                original_filename,
                mime,
                size_bytes,
                storage_provider,
                object_key,
                storage_url,
                upload_status,
                created_at,
                session_id
            FROM resumes
            WHERE session_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("documents_for_session", e))?;

        let docs = rows
            .iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Serialization(format!("failed to decode resume row: {e}")))?;
        Span::current().record("document_count", docs.len());
        Ok(docs)
    }

    #[instrument(skip(self), err)]
    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: &SessionStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(session_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_session_status", e))?;
        Ok(())
    }

    #[instrument(skip(self, results), err)]
    async fn upsert_results(
        &self,
        session_id: SessionId,
        results: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO analyses_results (results, session_id)
            VALUES ($1, $2)
            ON CONFLICT (session_id)
            DO UPDATE SET results = EXCLUDED.results, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(sqlx::types::Json(results))
        .bind(session_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_results", e))?;
        Ok(())
    }
}

fn document_from_row(row: &PgRow) -> Result<DocumentRef, sqlx::Error> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(DocumentRef {
        id: DocumentId::from_uuid(row.try_get("id")?),
        session_id: SessionId::from_uuid(row.try_get("session_id")?),
        original_filename: row.try_get("original_filename")?,
        mime: row.try_get("mime")?,
        size_bytes: row.try_get("size_bytes")?,
        storage_provider: row.try_get("storage_provider")?,
        object_key: row.try_get("object_key")?,
        storage_url: row.try_get("storage_url")?,
        upload_status: row.try_get("upload_status")?,
        created_at,
    })
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database {
            operation,
            message: db_err.message().to_owned(),
        },
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(format!("{operation}: {err}")),
        other => StoreError::Database {
            operation,
            message: other.to_string(),
        },
    }
}
