//! In-memory reference stores backed by [`DashMap`].
//!
//! Each mutation runs while holding the shard lock for its key, which gives
//! `conditional_update` compare-and-swap semantics and `insert` on the
//! ledger insert-if-absent semantics without any extra locking.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ApprovalLedger, DocumentStore, HistoryLog};
use crate::engine::TransitionEngine;
use crate::error::StoreError;
use crate::harness::{ConcurrencyHarness, ForceStatus, PurgeApproval};
use crate::model::{
    ApprovalRecord, Document, DocumentAction, DocumentId, DocumentNumberGenerator,
    DocumentStatus, HistoryEntry, NewDocument,
};

/// The three in-memory stores wired together.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub documents: Arc<MemoryDocumentStore>,
    pub history: Arc<MemoryHistoryLog>,
    pub ledger: Arc<MemoryApprovalLedger>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> TransitionEngine {
        TransitionEngine::new(
            self.documents.clone(),
            self.history.clone(),
            self.ledger.clone(),
        )
    }

    pub fn harness(&self) -> ConcurrencyHarness {
        ConcurrencyHarness::new(self.engine(), self.documents.clone(), self.ledger.clone())
    }
}

#[derive(Debug)]
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentId, Document>,
    next_id: AtomicI64,
    numbers: DocumentNumberGenerator,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            next_id: AtomicI64::new(1),
            numbers: DocumentNumberGenerator::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError> {
        let id = DocumentId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let document = Document {
            id,
            document_number: self.numbers.generate_at(now),
            author: new.author,
            title: new.title,
            status: DocumentStatus::Draft,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.get(&id).map(|d| d.value().clone()))
    }

    async fn get_many(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.documents.get(id).map(|d| d.value().clone()))
            .collect())
    }

    async fn conditional_update(
        &self,
        id: DocumentId,
        expected_version: i64,
        new_status: DocumentStatus,
    ) -> Result<Document, StoreError> {
        let mut document = self
            .documents
            .get_mut(&id)
            .ok_or(StoreError::NotFound { document_id: id })?;

        if document.version != expected_version {
            return Err(StoreError::VersionMismatch {
                document_id: id,
                expected_version,
            });
        }

        document.status = new_status;
        document.version += 1;
        document.updated_at = Utc::now();
        Ok(document.clone())
    }

    async fn scan_by_status(
        &self,
        status: DocumentStatus,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let mut matching: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.status == status)
            .map(|d| d.value().clone())
            .collect();
        matching.sort_by_key(|d| d.id);

        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StoreError> {
        Ok(self.documents.iter().filter(|d| d.status == status).count() as u64)
    }
}

#[async_trait]
impl ForceStatus for MemoryDocumentStore {
    async fn force_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<Document, StoreError> {
        let mut document = self
            .documents
            .get_mut(&id)
            .ok_or(StoreError::NotFound { document_id: id })?;
        document.status = status;
        document.version += 1;
        document.updated_at = Utc::now();
        Ok(document.clone())
    }
}

/// Append-only history, kept per document in insertion order.
#[derive(Debug, Default)]
pub struct MemoryHistoryLog {
    entries: DashMap<DocumentId, Vec<HistoryEntry>>,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all documents.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn append(
        &self,
        document_id: DocumentId,
        initiator: &str,
        action: DocumentAction,
        comment: Option<&str>,
    ) -> Result<HistoryEntry, StoreError> {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            document_id,
            initiator: initiator.to_string(),
            action,
            comment: comment.map(str::to_string),
            created_at: Utc::now(),
        };
        self.entries
            .entry(document_id)
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn list_for(&self, document_id: DocumentId) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .entries
            .get(&document_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryApprovalLedger {
    records: DashMap<DocumentId, ApprovalRecord>,
}

impl MemoryApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, document_id: DocumentId) -> Option<ApprovalRecord> {
        self.records.get(&document_id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl ApprovalLedger for MemoryApprovalLedger {
    async fn insert(
        &self,
        document_id: DocumentId,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        comment: Option<&str>,
    ) -> Result<ApprovalRecord, StoreError> {
        match self.records.entry(document_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyApproved { document_id }),
            Entry::Vacant(slot) => {
                let record = ApprovalRecord {
                    id: Uuid::new_v4(),
                    document_id,
                    approved_by: approved_by.to_string(),
                    approved_at,
                    comment: comment.map(str::to_string),
                    created_at: Utc::now(),
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn count_for(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        Ok(u64::from(self.records.contains_key(&document_id)))
    }
}

#[async_trait]
impl PurgeApproval for MemoryApprovalLedger {
    async fn purge(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        Ok(u64::from(self.records.remove(&document_id).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_assigns_increasing_ids_in_draft() {
        let store = MemoryDocumentStore::new();
        let a = store.create(NewDocument::new("alice", "A")).await.unwrap();
        let b = store.create(NewDocument::new("bob", "B")).await.unwrap();

        assert!(b.id > a.id);
        assert_ne!(a.document_number, b.document_number);
        assert_eq!(a.status, DocumentStatus::Draft);
        assert_eq!(a.version, 0);
        assert_eq!(a.created_at, a.updated_at);
    }

    #[tokio::test]
    async fn conditional_update_bumps_version_and_rejects_stale_token() {
        let store = MemoryDocumentStore::new();
        let doc = store.create(NewDocument::new("alice", "A")).await.unwrap();

        let updated = store
            .conditional_update(doc.id, 0, DocumentStatus::Submitted)
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.status, DocumentStatus::Submitted);
        assert_eq!(updated.created_at, doc.created_at);

        let stale = store
            .conditional_update(doc.id, 0, DocumentStatus::Approved)
            .await;
        assert!(matches!(
            stale,
            Err(StoreError::VersionMismatch {
                expected_version: 0,
                ..
            })
        ));
        let current = store.get(doc.id).await.unwrap().unwrap();
        assert_eq!(current.status, DocumentStatus::Submitted);
    }

    #[tokio::test]
    async fn conditional_update_on_missing_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        let result = store
            .conditional_update(DocumentId(42), 0, DocumentStatus::Submitted)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn scan_by_status_pages_in_id_order() {
        let store = MemoryDocumentStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let doc = store
                .create(NewDocument::new("alice", format!("doc {i}")))
                .await
                .unwrap();
            ids.push(doc.id);
        }
        store
            .conditional_update(ids[1], 0, DocumentStatus::Submitted)
            .await
            .unwrap();

        let first = store.scan_by_status(DocumentStatus::Draft, 0, 2).await.unwrap();
        let second = store.scan_by_status(DocumentStatus::Draft, 2, 2).await.unwrap();
        let third = store.scan_by_status(DocumentStatus::Draft, 4, 2).await.unwrap();

        let seen: Vec<_> = first.iter().chain(&second).map(|d| d.id).collect();
        assert_eq!(seen, vec![ids[0], ids[2], ids[3], ids[4]]);
        assert!(third.is_empty());
        assert_eq!(store.count_by_status(DocumentStatus::Draft).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn get_many_keeps_order_and_skips_missing() {
        let store = MemoryDocumentStore::new();
        let a = store.create(NewDocument::new("alice", "A")).await.unwrap();
        let b = store.create(NewDocument::new("bob", "B")).await.unwrap();

        let docs = store
            .get_many(&[b.id, DocumentId(999), a.id])
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn history_lists_newest_first() {
        let log = MemoryHistoryLog::new();
        let id = DocumentId(1);
        log.append(id, "alice", DocumentAction::Submit, None)
            .await
            .unwrap();
        log.append(id, "bob", DocumentAction::Approve, Some("ok"))
            .await
            .unwrap();

        let entries = log.list_for(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, DocumentAction::Approve);
        assert_eq!(entries[0].comment.as_deref(), Some("ok"));
        assert_eq!(entries[1].action, DocumentAction::Submit);
        assert!(log.list_for(DocumentId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ledger_insert_is_unique_per_document() {
        let ledger = MemoryApprovalLedger::new();
        let id = DocumentId(7);

        ledger.insert(id, "alice", Utc::now(), None).await.unwrap();
        let second = ledger.insert(id, "bob", Utc::now(), None).await;

        assert!(matches!(second, Err(StoreError::AlreadyApproved { .. })));
        assert_eq!(ledger.count_for(id).await.unwrap(), 1);
        assert_eq!(ledger.get(id).unwrap().approved_by, "alice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ledger_inserts_exactly_one_wins() {
        const N: usize = 32;
        let ledger = Arc::new(MemoryApprovalLedger::new());
        let id = DocumentId(1);

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .insert(id, &format!("approver-{i}"), Utc::now(), None)
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(ledger.count_for(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_hooks_bypass_state_machine() {
        let store = MemoryDocumentStore::new();
        let ledger = MemoryApprovalLedger::new();
        let doc = store.create(NewDocument::new("alice", "A")).await.unwrap();
        ledger.insert(doc.id, "bob", Utc::now(), None).await.unwrap();

        let forced = store
            .force_status(doc.id, DocumentStatus::Approved)
            .await
            .unwrap();
        assert_eq!(forced.status, DocumentStatus::Approved);
        assert_eq!(forced.version, 1);

        assert_eq!(ledger.purge(doc.id).await.unwrap(), 1);
        assert_eq!(ledger.purge(doc.id).await.unwrap(), 0);
        assert_eq!(ledger.count_for(doc.id).await.unwrap(), 0);
    }
}
