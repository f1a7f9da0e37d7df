//! Wire-format tests: status and action names cross the API boundary as
//! fixed string literals.

use crate::{
    BatchRequest, ConcurrencyTestResult, DocumentAction, DocumentId, DocumentStatus,
    OperationResult, OperationStatus,
};
use serde_json::json;

// ============================================================================
// Enum literals
// ============================================================================

#[test]
fn test_document_status_serializes_to_upper_case() {
    assert_eq!(serde_json::to_value(DocumentStatus::Draft).unwrap(), "DRAFT");
    assert_eq!(serde_json::to_value(DocumentStatus::Submitted).unwrap(), "SUBMITTED");
    assert_eq!(serde_json::to_value(DocumentStatus::Approved).unwrap(), "APPROVED");

    let parsed: DocumentStatus = serde_json::from_value(json!("SUBMITTED")).unwrap();
    assert_eq!(parsed, DocumentStatus::Submitted);
    assert!(serde_json::from_value::<DocumentStatus>(json!("submitted")).is_err());
}

#[test]
fn test_operation_status_serializes_to_fixed_literals() {
    let cases = [
        (OperationStatus::Success, "SUCCESS"),
        (OperationStatus::Conflict, "CONFLICT"),
        (OperationStatus::NotFound, "NOT_FOUND"),
        (OperationStatus::RegistryError, "REGISTRY_ERROR"),
    ];
    for (status, literal) in cases {
        assert_eq!(serde_json::to_value(status).unwrap(), literal);
        assert_eq!(status.as_str(), literal);
    }
}

#[test]
fn test_action_serializes_to_upper_case() {
    assert_eq!(serde_json::to_value(DocumentAction::Submit).unwrap(), "SUBMIT");
    assert_eq!(serde_json::to_value(DocumentAction::Approve).unwrap(), "APPROVE");
}

// ============================================================================
// Request / response shapes
// ============================================================================

#[test]
fn test_batch_request_comment_is_optional() {
    let request: BatchRequest =
        serde_json::from_value(json!({ "ids": [1, 2, 3], "initiator": "alice" })).unwrap();

    assert_eq!(request.ids, vec![DocumentId(1), DocumentId(2), DocumentId(3)]);
    assert_eq!(request.initiator, "alice");
    assert!(request.comment.is_none());

    let json = serde_json::to_value(&request).unwrap();
    assert!(json.get("comment").is_none());
}

#[test]
fn test_operation_result_shape() {
    let result = OperationResult::not_found(DocumentId(9));
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(
        json,
        json!({
            "document_id": 9,
            "status": "NOT_FOUND",
            "message": "Document not found"
        })
    );
}

#[test]
fn test_concurrency_result_reports_final_status_as_literal() {
    let result = ConcurrencyTestResult {
        document_id: DocumentId(1),
        total_attempts: 10,
        successful_attempts: 1,
        conflict_attempts: 9,
        error_attempts: 0,
        final_status: DocumentStatus::Approved,
        registry_entries_count: 1,
        timed_out: false,
        elapsed_ms: 12,
    };
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["final_status"], "APPROVED");
    assert_eq!(json["registry_entries_count"], 1);
    assert!(result.is_linearizable());
    assert_eq!(result.completed_attempts(), 10);
}
