use crate::model::{DocumentId, DocumentStatus};

/// Errors returned by store implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No document with this id.
    #[error("document not found: {document_id}")]
    NotFound { document_id: DocumentId },

    /// Optimistic concurrency conflict: the document was modified after it
    /// was read. The expected version no longer matches.
    #[error("concurrent modification of document {document_id}: expected version {expected_version}")]
    VersionMismatch {
        document_id: DocumentId,
        expected_version: i64,
    },

    /// An approval record for this document already exists. Expected under
    /// contention: it is the losing side of an approval race.
    #[error("document {document_id} is already registered as approved")]
    AlreadyApproved { document_id: DocumentId },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Request-level errors from [`TransitionEngine`](crate::TransitionEngine).
///
/// Per-item conditions never show up here; they are reported as
/// [`OperationResult`](crate::OperationResult) values.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("invalid batch request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("failed to fetch {status} documents: {source}")]
    Fetch {
        status: DocumentStatus,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
