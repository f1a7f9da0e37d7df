//! # Docflow
//!
//! A document lifecycle engine: documents move irreversibly through
//! `DRAFT → SUBMITTED → APPROVED`, every move is audited, and each document
//! is approved at most once even when many callers race to approve it.
//!
//! ## Architecture
//!
//! ```text
//! HTTP handlers / Sweepers / ConcurrencyHarness
//!     │
//!     ▼ submit(batch) / approve(batch)
//! TransitionEngine ─────────────────────────────┐
//!     │                                         │
//!     ├─► DocumentStore.get()                   │
//!     │                                         │
//!     ├─► ApprovalLedger.insert()   (approve)   │  one OperationResult
//!     │        └─ insert-if-absent: one winner  │  per requested id,
//!     │                                         │  in request order
//!     ├─► DocumentStore.conditional_update()    │
//!     │        └─ compare-and-swap on version   │
//!     │                                         │
//!     └─► HistoryLog.append() ──────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Forward only** - status moves along `DRAFT → SUBMITTED → APPROVED`, nothing else
//! 2. **Checked writes** - every status write is conditioned on the version read before it
//! 3. **Ledger first** - an approval record is inserted before the status becomes `APPROVED`;
//!    losing that insert leaves the document untouched
//! 4. **Item independence** - one item's failure never hides or rolls back another's result
//! 5. **Audit per transition** - each successful transition appends one history entry
//!
//! ## Example
//!
//! ```ignore
//! use docflow_core::{BatchRequest, MemoryBackend, NewDocument, DocumentStore};
//!
//! let backend = MemoryBackend::new();
//! let engine = backend.engine();
//!
//! let doc = backend.documents.create(NewDocument::new("alice", "Q3 report")).await?;
//! engine.submit(&BatchRequest::new([doc.id], "alice")).await?;
//! let results = engine.approve(&BatchRequest::new([doc.id], "bob")).await?;
//! assert!(results[0].is_success());
//! ```

mod batch;
mod engine;
mod error;
mod model;
mod store;
mod sweeper;

// Concurrency verification tooling
pub mod harness;

// Wire-format tests (test-only)
#[cfg(test)]
mod serde_tests;

// Re-export model types
pub use model::{
    ApprovalRecord, Document, DocumentAction, DocumentId, DocumentNumberGenerator,
    DocumentStatus, DocumentWithHistory, HistoryEntry, NewDocument,
};

// Re-export batch types
pub use batch::{BatchRequest, BatchSummary, OperationResult, OperationStatus, MAX_BATCH_SIZE};

// Re-export error types
pub use error::{EngineError, HarnessError, StoreError, SweepError};

// Re-export store contracts and in-memory stores
pub use store::{
    ApprovalLedger, DocumentStore, HistoryLog, MemoryApprovalLedger, MemoryBackend,
    MemoryDocumentStore, MemoryHistoryLog,
};

// Re-export engine and sweepers
pub use engine::TransitionEngine;
pub use sweeper::{SweepKind, SweepReport, Sweeper, SweeperConfig};

// Re-export harness entry points
pub use harness::{ConcurrencyHarness, ConcurrencyTestResult, HarnessConfig};

// Re-export commonly used external types
pub use async_trait::async_trait;
