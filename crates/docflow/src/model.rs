//! Document lifecycle records.
//!
//! A [`Document`] moves forward along `DRAFT → SUBMITTED → APPROVED` and
//! nowhere else. Every successful move leaves one [`HistoryEntry`]; an
//! approval additionally leaves exactly one [`ApprovalRecord`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned document identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle status. Serialized as `DRAFT`, `SUBMITTED`, `APPROVED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Approved,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 3] = [Self::Draft, Self::Submitted, Self::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
        }
    }

    /// The only status reachable from `self`, if any.
    pub fn successor(&self) -> Option<DocumentStatus> {
        match self {
            Self::Draft => Some(Self::Submitted),
            Self::Submitted => Some(Self::Approved),
            Self::Approved => None,
        }
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        self.successor() == Some(next)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SUBMITTED" => Ok(Self::Submitted),
            "APPROVED" => Ok(Self::Approved),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

/// Audited lifecycle action. Serialized as `SUBMIT`, `APPROVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentAction {
    Submit,
    Approve,
}

impl DocumentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "SUBMIT",
            Self::Approve => "APPROVE",
        }
    }

    /// Status a document must be in for this action to apply.
    pub fn source_status(&self) -> DocumentStatus {
        match self {
            Self::Submit => DocumentStatus::Draft,
            Self::Approve => DocumentStatus::Submitted,
        }
    }

    /// Status a document ends up in after this action.
    pub fn target_status(&self) -> DocumentStatus {
        match self {
            Self::Submit => DocumentStatus::Submitted,
            Self::Approve => DocumentStatus::Approved,
        }
    }
}

impl fmt::Display for DocumentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMIT" => Ok(Self::Submit),
            "APPROVE" => Ok(Self::Approve),
            other => Err(format!("unknown document action: {other}")),
        }
    }
}

/// A document as read from a [`DocumentStore`](crate::DocumentStore).
///
/// `version` is the concurrency token: every successful mutation bumps it,
/// and every status write is conditioned on the value read beforehand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub document_number: String,
    pub author: String,
    pub title: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// Input for creating a document in `DRAFT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub author: String,
    pub title: String,
}

impl NewDocument {
    pub fn new(author: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
        }
    }
}

/// Immutable audit record, one per successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub initiator: String,
    pub action: DocumentAction,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The single approval of a document. At most one exists per document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A document together with its history, newest entry first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentWithHistory {
    pub document: Document,
    pub history: Vec<HistoryEntry>,
}

/// Generates document numbers of the form `DOC-YYYYMMDD-NNNNNN`.
///
/// The sequence is process-wide for a generator instance and safe to share
/// across threads.
#[derive(Debug)]
pub struct DocumentNumberGenerator {
    counter: AtomicU64,
}

impl DocumentNumberGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            counter: AtomicU64::new(first),
        }
    }

    pub fn generate(&self) -> String {
        self.generate_at(Utc::now())
    }

    pub fn generate_at(&self, now: DateTime<Utc>) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("DOC-{}-{:06}", now.format("%Y%m%d"), sequence)
    }
}

impl Default for DocumentNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_moves_only_forward() {
        assert!(DocumentStatus::Draft.can_transition_to(DocumentStatus::Submitted));
        assert!(DocumentStatus::Submitted.can_transition_to(DocumentStatus::Approved));

        assert!(!DocumentStatus::Draft.can_transition_to(DocumentStatus::Approved));
        assert!(!DocumentStatus::Submitted.can_transition_to(DocumentStatus::Draft));
        assert!(!DocumentStatus::Approved.can_transition_to(DocumentStatus::Submitted));
        assert!(!DocumentStatus::Approved.can_transition_to(DocumentStatus::Approved));

        assert_eq!(DocumentStatus::Approved.successor(), None);
    }

    #[test]
    fn action_statuses_line_up_with_state_machine() {
        for action in [DocumentAction::Submit, DocumentAction::Approve] {
            assert!(action.source_status().can_transition_to(action.target_status()));
        }
    }

    #[test]
    fn status_string_parse_matches_display() {
        for status in DocumentStatus::ALL {
            let parsed: DocumentStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("REJECTED".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn number_generator_formats_date_and_sequence() {
        let generator = DocumentNumberGenerator::new();
        let now = Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap();

        assert_eq!(generator.generate_at(now), "DOC-20260220-000001");
        assert_eq!(generator.generate_at(now), "DOC-20260220-000002");
    }

    #[test]
    fn number_generator_is_unique_across_threads() {
        let generator = std::sync::Arc::new(DocumentNumberGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..100).map(|_| generator.generate()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = std::collections::HashSet::new();
        for handle in handles {
            for number in handle.join().unwrap() {
                assert!(all.insert(number));
            }
        }
        assert_eq!(all.len(), 800);
    }
}
