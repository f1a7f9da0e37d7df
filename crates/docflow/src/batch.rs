//! Batch request and per-item result types.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{DocumentId, DocumentStatus};

/// Upper bound on ids in a single batch request.
pub const MAX_BATCH_SIZE: usize = 1000;

const INITIATOR_MIN_LEN: usize = 2;
const INITIATOR_MAX_LEN: usize = 100;

/// A batch submit/approve request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<DocumentId>,
    pub initiator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl BatchRequest {
    pub fn new(ids: impl IntoIterator<Item = DocumentId>, initiator: impl Into<String>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            initiator: initiator.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Reject request-level defects before any item is touched.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ids.is_empty() {
            return Err(EngineError::InvalidRequest(
                "document ids list cannot be empty".into(),
            ));
        }
        if self.ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::InvalidRequest(format!(
                "cannot process more than {MAX_BATCH_SIZE} documents at once, got {}",
                self.ids.len()
            )));
        }
        let initiator_len = self.initiator.trim().chars().count();
        if !(INITIATOR_MIN_LEN..=INITIATOR_MAX_LEN).contains(&initiator_len) {
            return Err(EngineError::InvalidRequest(format!(
                "initiator must be between {INITIATOR_MIN_LEN} and {INITIATOR_MAX_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// Outcome of one item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Success,
    Conflict,
    NotFound,
    RegistryError,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::RegistryError => "REGISTRY_ERROR",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub document_id: DocumentId,
    pub status: OperationStatus,
    pub message: String,
}

impl OperationResult {
    pub fn success(document_id: DocumentId, message: impl Into<String>) -> Self {
        Self {
            document_id,
            status: OperationStatus::Success,
            message: message.into(),
        }
    }

    pub fn not_found(document_id: DocumentId) -> Self {
        Self {
            document_id,
            status: OperationStatus::NotFound,
            message: "Document not found".into(),
        }
    }

    /// Status precondition failed.
    pub fn wrong_status(
        document_id: DocumentId,
        actual: DocumentStatus,
        expected: DocumentStatus,
    ) -> Self {
        Self {
            document_id,
            status: OperationStatus::Conflict,
            message: format!("Document is in {actual} status, expected {expected}"),
        }
    }

    /// Unexpected failure while processing this item.
    pub fn failed(document_id: DocumentId, cause: impl std::fmt::Display) -> Self {
        Self {
            document_id,
            status: OperationStatus::Conflict,
            message: format!("Error processing document: {cause}"),
        }
    }

    pub fn registry_error(document_id: DocumentId, cause: impl std::fmt::Display) -> Self {
        Self {
            document_id,
            status: OperationStatus::RegistryError,
            message: format!("Failed to register approval: {cause}"),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// Per-status tally over a batch's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub success: usize,
    pub conflict: usize,
    pub not_found: usize,
    pub registry_error: usize,
}

impl BatchSummary {
    pub fn of(results: &[OperationResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.record(result.status);
        }
        summary
    }

    pub fn record(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Success => self.success += 1,
            OperationStatus::Conflict => self.conflict += 1,
            OperationStatus::NotFound => self.not_found += 1,
            OperationStatus::RegistryError => self.registry_error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.conflict + self.not_found + self.registry_error
    }

    pub fn merge(&mut self, other: BatchSummary) {
        self.success += other.success;
        self.conflict += other.conflict;
        self.not_found += other.not_found;
        self.registry_error += other.registry_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_oversized_batches() {
        let empty = BatchRequest::new(Vec::new(), "alice");
        assert!(matches!(empty.validate(), Err(EngineError::InvalidRequest(_))));

        let oversized = BatchRequest::new((0..=MAX_BATCH_SIZE as i64).map(DocumentId), "alice");
        assert!(oversized.validate().is_err());

        let max = BatchRequest::new((0..MAX_BATCH_SIZE as i64).map(DocumentId), "alice");
        assert!(max.validate().is_ok());
    }

    #[test]
    fn validate_checks_initiator_length() {
        assert!(BatchRequest::new([DocumentId(1)], "a").validate().is_err());
        assert!(BatchRequest::new([DocumentId(1)], "   ").validate().is_err());
        assert!(BatchRequest::new([DocumentId(1)], "x".repeat(101))
            .validate()
            .is_err());
        assert!(BatchRequest::new([DocumentId(1)], "ab").validate().is_ok());
    }

    #[test]
    fn conflict_message_names_actual_and_expected_status() {
        let result = OperationResult::wrong_status(
            DocumentId(3),
            DocumentStatus::Approved,
            DocumentStatus::Draft,
        );
        assert_eq!(result.status, OperationStatus::Conflict);
        assert_eq!(result.message, "Document is in APPROVED status, expected DRAFT");
    }

    #[test]
    fn summary_counts_every_result_once() {
        let results = vec![
            OperationResult::success(DocumentId(1), "ok"),
            OperationResult::not_found(DocumentId(2)),
            OperationResult::registry_error(DocumentId(3), "dup"),
            OperationResult::failed(DocumentId(4), "boom"),
        ];
        let summary = BatchSummary::of(&results);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.registry_error, 1);
        assert_eq!(summary.conflict, 1);
        assert_eq!(summary.total(), results.len());
    }
}
