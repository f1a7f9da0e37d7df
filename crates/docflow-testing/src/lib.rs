//! Testing utilities for docflow.
//!
//! - [`FailingLedger`] wraps an approval ledger and fails or delays inserts
//!   on demand.
//! - [`FlakyDocumentStore`] wraps the in-memory document store and injects
//!   read failures, concurrent version bumps, or writers that move a
//!   document right after it was scanned.
//! - [`TestBackend`] wires both together with an in-memory history log.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docflow_core::harness::{ForceStatus, PurgeApproval};
use docflow_core::{
    ApprovalLedger, ApprovalRecord, BatchRequest, ConcurrencyHarness, Document, DocumentId,
    DocumentStatus, DocumentStore, MemoryApprovalLedger, MemoryDocumentStore, MemoryHistoryLog,
    NewDocument, StoreError, TransitionEngine,
};

/// Ledger wrapper whose inserts can be forced to fail with a backend error.
#[derive(Debug, Default)]
pub struct FailingLedger<L = MemoryApprovalLedger> {
    inner: L,
    fail_all: AtomicBool,
    fail_for: Mutex<HashSet<DocumentId>>,
    insert_delay: Mutex<Option<Duration>>,
}

impl<L> FailingLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            fail_all: AtomicBool::new(false),
            fail_for: Mutex::new(HashSet::new()),
            insert_delay: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_for(&self, document_id: DocumentId) {
        self.fail_for.lock().unwrap().insert(document_id);
    }

    /// Every insert sleeps for `delay` before it is decided.
    pub fn slow_down(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap() = Some(delay);
    }

    fn should_fail(&self, document_id: DocumentId) -> bool {
        self.fail_all.load(Ordering::SeqCst) || self.fail_for.lock().unwrap().contains(&document_id)
    }
}

#[async_trait]
impl<L: ApprovalLedger> ApprovalLedger for FailingLedger<L> {
    async fn insert(
        &self,
        document_id: DocumentId,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        comment: Option<&str>,
    ) -> Result<ApprovalRecord, StoreError> {
        let delay = *self.insert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail(document_id) {
            return Err(StoreError::Backend("injected ledger failure".into()));
        }
        self.inner
            .insert(document_id, approved_by, approved_at, comment)
            .await
    }

    async fn count_for(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        self.inner.count_for(document_id).await
    }
}

#[async_trait]
impl<L: PurgeApproval> PurgeApproval for FailingLedger<L> {
    async fn purge(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        self.inner.purge(document_id).await
    }
}

/// Document store wrapper that misbehaves for selected ids.
#[derive(Debug, Default)]
pub struct FlakyDocumentStore {
    inner: MemoryDocumentStore,
    failing_reads: Mutex<HashSet<DocumentId>>,
    interference: Mutex<HashMap<DocumentId, usize>>,
    moved_after_scan: Mutex<HashMap<DocumentId, DocumentStatus>>,
    fail_scans: AtomicBool,
}

impl FlakyDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryDocumentStore {
        &self.inner
    }

    /// Every `get` of `id` fails with a backend error.
    pub fn fail_reads_for(&self, id: DocumentId) {
        self.failing_reads.lock().unwrap().insert(id);
    }

    /// The next `times` conditional updates of `id` see another writer bump
    /// the version just before they land.
    pub fn interfere_with(&self, id: DocumentId, times: usize) {
        self.interference.lock().unwrap().insert(id, times);
    }

    /// The next scan that returns `id` is followed by another writer moving
    /// it to `status`, before the caller gets to act on the page.
    pub fn move_after_scan(&self, id: DocumentId, status: DocumentStatus) {
        self.moved_after_scan.lock().unwrap().insert(id, status);
    }

    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    fn take_interference(&self, id: DocumentId) -> bool {
        let mut interference = self.interference.lock().unwrap();
        match interference.get_mut(&id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    async fn create(&self, new: NewDocument) -> Result<Document, StoreError> {
        self.inner.create(new).await
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let failing = self.failing_reads.lock().unwrap().contains(&id);
        if failing {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        self.inner.get(id).await
    }

    async fn get_many(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        self.inner.get_many(ids).await
    }

    async fn conditional_update(
        &self,
        id: DocumentId,
        expected_version: i64,
        new_status: DocumentStatus,
    ) -> Result<Document, StoreError> {
        if self.take_interference(id) {
            if let Some(current) = self.inner.get(id).await? {
                self.inner.force_status(id, current.status).await?;
            }
        }
        self.inner
            .conditional_update(id, expected_version, new_status)
            .await
    }

    async fn scan_by_status(
        &self,
        status: DocumentStatus,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected scan failure".into()));
        }
        let page = self.inner.scan_by_status(status, offset, limit).await?;

        let moves: Vec<_> = {
            let mut pending = self.moved_after_scan.lock().unwrap();
            page.iter()
                .filter_map(|d| pending.remove(&d.id).map(|to| (d.id, to)))
                .collect()
        };
        for (id, to) in moves {
            self.inner.force_status(id, to).await?;
        }
        Ok(page)
    }

    async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StoreError> {
        self.inner.count_by_status(status).await
    }
}

#[async_trait]
impl ForceStatus for FlakyDocumentStore {
    async fn force_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<Document, StoreError> {
        self.inner.force_status(id, status).await
    }
}

/// In-memory stores with fault injection, wired together.
#[derive(Debug, Clone, Default)]
pub struct TestBackend {
    pub documents: Arc<FlakyDocumentStore>,
    pub history: Arc<MemoryHistoryLog>,
    pub ledger: Arc<FailingLedger>,
}

impl TestBackend {
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

    /// Create a document and drive it to `status` through the engine.
    pub async fn document_in(&self, status: DocumentStatus) -> Document {
        let document = self
            .documents
            .create(NewDocument::new("fixture-author", "fixture document"))
            .await
            .unwrap();
        let engine = self.engine();

        if matches!(status, DocumentStatus::Submitted | DocumentStatus::Approved) {
            let results = engine
                .submit(&BatchRequest::new([document.id], "fixture"))
                .await
                .unwrap();
            assert!(results[0].is_success(), "fixture submit failed: {results:?}");
        }
        if status == DocumentStatus::Approved {
            let results = engine
                .approve(&BatchRequest::new([document.id], "fixture"))
                .await
                .unwrap();
            assert!(results[0].is_success(), "fixture approve failed: {results:?}");
        }

        self.documents.get(document.id).await.unwrap().unwrap()
    }

    pub async fn documents_in(&self, status: DocumentStatus, n: usize) -> Vec<Document> {
        let mut documents = Vec::with_capacity(n);
        for _ in 0..n {
            documents.push(self.document_in(status).await);
        }
        documents
    }

    pub async fn status_of(&self, id: DocumentId) -> DocumentStatus {
        self.documents.get(id).await.unwrap().unwrap().status
    }
}
