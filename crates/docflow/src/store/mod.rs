//! Store contracts consumed by the transition engine.
//!
//! Three independent stores are shared by every caller:
//!
//! - [`DocumentStore`]: documents keyed by id, guarded by a version token.
//! - [`HistoryLog`]: append-only lifecycle events.
//! - [`ApprovalLedger`]: at most one approval record per document.
//!
//! All status writes go through [`DocumentStore::conditional_update`], a
//! compare-and-swap on the version read beforehand. Approval uniqueness is
//! decided by [`ApprovalLedger::insert`], an insert-if-absent.
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync + 'static` so they can be shared
//! behind `Arc` across tokio tasks.

mod memory;

pub use memory::{MemoryApprovalLedger, MemoryBackend, MemoryDocumentStore, MemoryHistoryLog};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    ApprovalRecord, Document, DocumentAction, DocumentId, DocumentStatus, HistoryEntry,
    NewDocument,
};

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Insert a new document in `DRAFT` at version 0.
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError>;

    /// Read a document, `None` if absent.
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Read several documents. Absent ids are skipped; input order is kept.
    async fn get_many(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError>;

    /// Set `status` if and only if the stored version equals `expected_version`.
    ///
    /// On success the version is bumped, `updated_at` refreshed, and the
    /// updated document returned. Returns `StoreError::VersionMismatch` when
    /// the token is stale and `StoreError::NotFound` when the id is absent.
    async fn conditional_update(
        &self,
        id: DocumentId,
        expected_version: i64,
        new_status: DocumentStatus,
    ) -> Result<Document, StoreError>;

    /// Documents in `status`, ordered by id, skipping `offset` and returning
    /// at most `limit`.
    async fn scan_by_status(
        &self,
        status: DocumentStatus,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait HistoryLog: Send + Sync + 'static {
    async fn append(
        &self,
        document_id: DocumentId,
        initiator: &str,
        action: DocumentAction,
        comment: Option<&str>,
    ) -> Result<HistoryEntry, StoreError>;

    /// All entries for a document, newest first.
    async fn list_for(&self, document_id: DocumentId) -> Result<Vec<HistoryEntry>, StoreError>;
}

#[async_trait]
pub trait ApprovalLedger: Send + Sync + 'static {
    /// Insert the approval record for `document_id` if none exists.
    ///
    /// Exactly one concurrent caller can succeed per document id. The others
    /// get `StoreError::AlreadyApproved`, which callers treat as a lost race
    /// rather than a fault.
    async fn insert(
        &self,
        document_id: DocumentId,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        comment: Option<&str>,
    ) -> Result<ApprovalRecord, StoreError>;

    async fn count_for(&self, document_id: DocumentId) -> Result<u64, StoreError>;
}
