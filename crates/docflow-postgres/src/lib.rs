//! PostgreSQL implementation of the docflow stores.
//!
//! [`PgStore`] implements `DocumentStore`, `HistoryLog` and `ApprovalLedger`
//! on one connection pool, plus the harness reset hooks.
//!
//! # Features
//!
//! - Optimistic locking with `UPDATE ... WHERE version = $expected`
//! - Approval uniqueness through a `UNIQUE (document_id)` index
//! - Document numbers derived from the id sequence, unique across processes
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     id BIGSERIAL PRIMARY KEY,
//!     document_number TEXT NOT NULL UNIQUE,
//!     author TEXT NOT NULL,
//!     title TEXT NOT NULL,
//!     status TEXT NOT NULL CHECK (status IN ('DRAFT', 'SUBMITTED', 'APPROVED')),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     version BIGINT NOT NULL DEFAULT 0
//! );
//!
//! CREATE INDEX idx_documents_status ON documents (status, id);
//!
//! CREATE TABLE document_history (
//!     id UUID PRIMARY KEY,
//!     document_id BIGINT NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
//!     initiator TEXT NOT NULL,
//!     action TEXT NOT NULL CHECK (action IN ('SUBMIT', 'APPROVE')),
//!     comment TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
//! );
//!
//! CREATE TABLE approval_registry (
//!     id UUID PRIMARY KEY,
//!     document_id BIGINT NOT NULL UNIQUE REFERENCES documents (id) ON DELETE CASCADE,
//!     approved_by TEXT NOT NULL,
//!     approved_at TIMESTAMPTZ NOT NULL,
//!     comment TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use docflow_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/docflow").await?;
//! let store = Arc::new(PgStore::new(pool));
//! store.migrate().await?;
//!
//! let engine = TransitionEngine::new(store.clone(), store.clone(), store.clone());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docflow_core::harness::{ForceStatus, PurgeApproval};
use docflow_core::{
    ApprovalLedger, ApprovalRecord, ConcurrencyHarness, Document, DocumentAction, DocumentId,
    DocumentStatus, DocumentStore, HistoryEntry, HistoryLog, NewDocument, StoreError,
    TransitionEngine,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id BIGSERIAL PRIMARY KEY,
        document_number TEXT NOT NULL UNIQUE,
        author TEXT NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('DRAFT', 'SUBMITTED', 'APPROVED')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        version BIGINT NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents (status, id)",
    r#"
    CREATE TABLE IF NOT EXISTS document_history (
        id UUID PRIMARY KEY,
        document_id BIGINT NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
        initiator TEXT NOT NULL,
        action TEXT NOT NULL CHECK (action IN ('SUBMIT', 'APPROVE')),
        comment TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_history_document ON document_history (document_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS approval_registry (
        id UUID PRIMARY KEY,
        document_id BIGINT NOT NULL UNIQUE REFERENCES documents (id) ON DELETE CASCADE,
        approved_by TEXT NOT NULL,
        approved_at TIMESTAMPTZ NOT NULL,
        comment TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

const DOCUMENT_COLUMNS: &str =
    "id, document_number, author, title, status, created_at, updated_at, version";

/// PostgreSQL store implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("docflow schema ready");
        Ok(())
    }

    pub fn engine(self: &Arc<Self>) -> TransitionEngine {
        TransitionEngine::new(self.clone(), self.clone(), self.clone())
    }

    pub fn harness(self: &Arc<Self>) -> ConcurrencyHarness {
        ConcurrencyHarness::new(self.engine(), self.clone(), self.clone())
    }

    async fn exists(&self, id: DocumentId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM documents WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.is_some())
    }
}

fn document_from_row(row: &PgRow) -> Result<Document, StoreError> {
    let status: String = row.try_get("status").map_err(StoreError::backend)?;
    Ok(Document {
        id: DocumentId(row.try_get("id").map_err(StoreError::backend)?),
        document_number: row.try_get("document_number").map_err(StoreError::backend)?,
        author: row.try_get("author").map_err(StoreError::backend)?,
        title: row.try_get("title").map_err(StoreError::backend)?,
        status: status.parse().map_err(StoreError::Backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::backend)?,
        version: row.try_get("version").map_err(StoreError::backend)?,
    })
}

fn history_from_row(row: &PgRow) -> Result<HistoryEntry, StoreError> {
    let action: String = row.try_get("action").map_err(StoreError::backend)?;
    Ok(HistoryEntry {
        id: row.try_get("id").map_err(StoreError::backend)?,
        document_id: DocumentId(row.try_get("document_id").map_err(StoreError::backend)?),
        initiator: row.try_get("initiator").map_err(StoreError::backend)?,
        action: action.parse().map_err(StoreError::Backend)?,
        comment: row.try_get("comment").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            WITH next AS (
                SELECT nextval(pg_get_serial_sequence('documents', 'id')) AS id
            )
            INSERT INTO documents (id, document_number, author, title, status, version)
            SELECT next.id,
                   'DOC-' || to_char(NOW() AT TIME ZONE 'UTC', 'YYYYMMDD') || '-' || lpad(next.id::text, 6, '0'),
                   $1, $2, 'DRAFT', 0
            FROM next
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(&new.author)
        .bind(&new.title)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        document_from_row(&row)
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_many(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ANY($1)"
        ))
        .bind(&raw)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut by_id = HashMap::with_capacity(rows.len());
        for row in &rows {
            let document = document_from_row(row)?;
            by_id.insert(document.id, document);
        }
        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }

    /// Version-checked status write.
    ///
    /// Zero affected rows means either a stale token or a missing row; a
    /// follow-up existence check tells them apart.
    async fn conditional_update(
        &self,
        id: DocumentId,
        expected_version: i64,
        new_status: DocumentStatus,
    ) -> Result<Document, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE documents
            SET status = $1,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $2 AND version = $3
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(new_status.as_str())
        .bind(id.0)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if let Some(row) = row {
            return document_from_row(&row);
        }
        if self.exists(id).await? {
            Err(StoreError::VersionMismatch {
                document_id: id,
                expected_version,
            })
        } else {
            Err(StoreError::NotFound { document_id: id })
        }
    }

    async fn scan_by_status(
        &self,
        status: DocumentStatus,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents
            WHERE status = $1
            ORDER BY id ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl HistoryLog for PgStore {
    async fn append(
        &self,
        document_id: DocumentId,
        initiator: &str,
        action: DocumentAction,
        comment: Option<&str>,
    ) -> Result<HistoryEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO document_history (id, document_id, initiator, action, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, document_id, initiator, action, comment, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id.0)
        .bind(initiator)
        .bind(action.as_str())
        .bind(comment)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        history_from_row(&row)
    }

    async fn list_for(&self, document_id: DocumentId) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, initiator, action, comment, created_at
            FROM document_history
            WHERE document_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(document_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter().map(history_from_row).collect()
    }
}

#[async_trait]
impl ApprovalLedger for PgStore {
    /// Insert-if-absent backed by the `UNIQUE (document_id)` constraint.
    async fn insert(
        &self,
        document_id: DocumentId,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        comment: Option<&str>,
    ) -> Result<ApprovalRecord, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO approval_registry (id, document_id, approved_by, approved_at, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, document_id, approved_by, approved_at, comment, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id.0)
        .bind(approved_by)
        .bind(approved_at)
        .bind(comment)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::AlreadyApproved { document_id })
            }
            Err(err) => return Err(StoreError::backend(err)),
        };

        Ok(ApprovalRecord {
            id: row.try_get("id").map_err(StoreError::backend)?,
            document_id,
            approved_by: row.try_get("approved_by").map_err(StoreError::backend)?,
            approved_at: row.try_get("approved_at").map_err(StoreError::backend)?,
            comment: row.try_get("comment").map_err(StoreError::backend)?,
            created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        })
    }

    async fn count_for(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM approval_registry WHERE document_id = $1")
                .bind(document_id.0)
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ForceStatus for PgStore {
    async fn force_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<Document, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE documents
            SET status = $1,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $2
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        match row {
            Some(row) => document_from_row(&row),
            None => Err(StoreError::NotFound { document_id: id }),
        }
    }
}

#[async_trait]
impl PurgeApproval for PgStore {
    async fn purge(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM approval_registry WHERE document_id = $1")
            .bind(document_id.0)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(result.rows_affected())
    }
}
