//! Batch submit/approve over the three stores.
//!
//! Each id in a batch is an independent attempt. Its outcome is final and
//! is never rolled back because a sibling item failed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchRequest, BatchSummary, OperationResult};
use crate::error::{EngineError, StoreError};
use crate::model::{Document, DocumentAction, DocumentId, DocumentWithHistory};
use crate::store::{ApprovalLedger, DocumentStore, HistoryLog};

/// How many times a won approval retries its status write after a token
/// mismatch before reporting a conflict.
const APPROVE_UPDATE_ATTEMPTS: usize = 3;

/// The status-transition engine.
///
/// Cheap to clone; all clones share the same stores. Safe to call
/// concurrently for the same or different ids.
#[derive(Clone)]
pub struct TransitionEngine {
    documents: Arc<dyn DocumentStore>,
    history: Arc<dyn HistoryLog>,
    ledger: Arc<dyn ApprovalLedger>,
}

impl TransitionEngine {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        history: Arc<dyn HistoryLog>,
        ledger: Arc<dyn ApprovalLedger>,
    ) -> Self {
        Self {
            documents,
            history,
            ledger,
        }
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn history(&self) -> &Arc<dyn HistoryLog> {
        &self.history
    }

    pub fn ledger(&self) -> &Arc<dyn ApprovalLedger> {
        &self.ledger
    }

    /// Move each `DRAFT` document in the request to `SUBMITTED`.
    ///
    /// Returns one result per requested id, in request order. Only a
    /// malformed request fails as a whole.
    pub async fn submit(&self, request: &BatchRequest) -> Result<Vec<OperationResult>, EngineError> {
        self.run_batch(DocumentAction::Submit, request).await
    }

    /// Move each `SUBMITTED` document in the request to `APPROVED`.
    ///
    /// The approval record is inserted before the status write. Whoever
    /// inserts it first is the only caller allowed to approve; everyone else
    /// gets `REGISTRY_ERROR` and the document is left as it was.
    pub async fn approve(&self, request: &BatchRequest) -> Result<Vec<OperationResult>, EngineError> {
        self.run_batch(DocumentAction::Approve, request).await
    }

    /// A document with its history, newest first.
    pub async fn document_with_history(
        &self,
        id: DocumentId,
    ) -> Result<Option<DocumentWithHistory>, StoreError> {
        let Some(document) = self.documents.get(id).await? else {
            return Ok(None);
        };
        let history = self.history.list_for(id).await?;
        Ok(Some(DocumentWithHistory { document, history }))
    }

    async fn run_batch(
        &self,
        action: DocumentAction,
        request: &BatchRequest,
    ) -> Result<Vec<OperationResult>, EngineError> {
        request.validate()?;

        let started = Instant::now();
        info!(
            action = %action,
            count = request.ids.len(),
            initiator = %request.initiator,
            "processing batch"
        );

        let comment = request.comment.as_deref();
        let mut results = Vec::with_capacity(request.ids.len());
        for &id in &request.ids {
            let attempt = match action {
                DocumentAction::Submit => self.try_submit(id, &request.initiator, comment).await,
                DocumentAction::Approve => self.try_approve(id, &request.initiator, comment).await,
            };
            let result = attempt.unwrap_or_else(|err| {
                error!(action = %action, document_id = %id, error = %err, "error processing document");
                OperationResult::failed(id, err)
            });
            results.push(result);
        }

        let summary = BatchSummary::of(&results);
        info!(
            action = %action,
            success = summary.success,
            conflict = summary.conflict,
            not_found = summary.not_found,
            registry_error = summary.registry_error,
            duration_ms = started.elapsed().as_millis() as u64,
            "batch completed"
        );
        Ok(results)
    }

    async fn try_submit(
        &self,
        id: DocumentId,
        initiator: &str,
        comment: Option<&str>,
    ) -> Result<OperationResult, StoreError> {
        let action = DocumentAction::Submit;
        let document = match self.load_in(id, action).await? {
            Ok(document) => document,
            Err(rejected) => return Ok(rejected),
        };

        match self
            .documents
            .conditional_update(id, document.version, action.target_status())
            .await
        {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => return Ok(OperationResult::not_found(id)),
            Err(err @ StoreError::VersionMismatch { .. }) => {
                debug!(document_id = %id, "submit lost a concurrent update");
                return Ok(OperationResult::failed(id, err));
            }
            Err(err) => return Err(err),
        }

        self.history
            .append(id, initiator, action, comment)
            .await?;
        debug!(document_id = %id, initiator, "document submitted");

        Ok(OperationResult::success(id, "Document submitted successfully"))
    }

    async fn try_approve(
        &self,
        id: DocumentId,
        initiator: &str,
        comment: Option<&str>,
    ) -> Result<OperationResult, StoreError> {
        let document = match self.load_in(id, DocumentAction::Approve).await? {
            Ok(document) => document,
            Err(rejected) => return Ok(rejected),
        };

        // Linearization point: at most one insert per id succeeds.
        if let Err(err) = self.ledger.insert(id, initiator, Utc::now(), comment).await {
            match err {
                StoreError::AlreadyApproved { .. } => {
                    debug!(document_id = %id, "approval already registered")
                }
                ref other => {
                    error!(document_id = %id, error = %other, "failed to create registry entry")
                }
            }
            return Ok(OperationResult::registry_error(id, err));
        }

        self.finish_approval(document, initiator, comment).await
    }

    /// Write `APPROVED` for a document whose approval record this caller owns.
    async fn finish_approval(
        &self,
        mut document: Document,
        initiator: &str,
        comment: Option<&str>,
    ) -> Result<OperationResult, StoreError> {
        let id = document.id;
        let action = DocumentAction::Approve;
        let mut attempt = 1;
        loop {
            match self
                .documents
                .conditional_update(id, document.version, action.target_status())
                .await
            {
                Ok(_) => break,
                Err(StoreError::NotFound { .. }) => return Ok(OperationResult::not_found(id)),
                Err(err @ StoreError::VersionMismatch { .. }) => {
                    if attempt >= APPROVE_UPDATE_ATTEMPTS {
                        warn!(document_id = %id, attempt, "approval status write kept conflicting");
                        return Ok(OperationResult::failed(id, err));
                    }
                    attempt += 1;
                    document = match self.load_in(id, action).await? {
                        Ok(fresh) => fresh,
                        Err(rejected) => return Ok(rejected),
                    };
                }
                Err(err) => return Err(err),
            }
        }

        self.history
            .append(id, initiator, action, comment)
            .await?;
        debug!(document_id = %id, initiator, "document approved");

        Ok(OperationResult::success(id, "Document approved successfully"))
    }

    /// Read `id` and check `action` can move it forward from its current
    /// status. The inner `Err` is the per-item rejection to report.
    async fn load_in(
        &self,
        id: DocumentId,
        action: DocumentAction,
    ) -> Result<Result<Document, OperationResult>, StoreError> {
        let Some(document) = self.documents.get(id).await? else {
            return Ok(Err(OperationResult::not_found(id)));
        };
        if !document.status.can_transition_to(action.target_status()) {
            return Ok(Err(OperationResult::wrong_status(
                id,
                document.status,
                action.source_status(),
            )));
        }
        Ok(Ok(document))
    }
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine").finish_non_exhaustive()
    }
}
