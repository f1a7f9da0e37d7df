//! Concurrency verification: fire many approve attempts at one document
//! and report how they were decided.
//!
//! Under correct concurrency control every run ends with exactly one
//! successful attempt, exactly one approval record, and the document in
//! `APPROVED`, whatever the thread and attempt counts.
//!
//! The harness needs to rewind an already approved document so it can be
//! raced again. That rewind goes through [`ForceStatus`] and
//! [`PurgeApproval`], which bypass the state machine and leave no history.
//! Nothing outside this module consumes them; do not wire them into a
//! production path.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{join_all, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::batch::{BatchRequest, OperationStatus};
use crate::engine::TransitionEngine;
use crate::error::{HarnessError, StoreError};
use crate::model::{Document, DocumentId, DocumentStatus};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ATTEMPT_COMMENT: &str = "Concurrency test attempt";

/// Test-only: overwrite a document's status without going through the
/// state machine. Bumps the version so stale tokens are rejected.
#[async_trait]
pub trait ForceStatus: Send + Sync + 'static {
    async fn force_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<Document, StoreError>;
}

/// Test-only: remove the approval record of a document. Returns the number
/// of records removed.
#[async_trait]
pub trait PurgeApproval: Send + Sync + 'static {
    async fn purge(&self, document_id: DocumentId) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Concurrent workers.
    pub threads: usize,
    /// Total approve attempts spread across the workers.
    pub attempts: usize,
    pub initiator: String,
    /// Upper bound on waiting for attempts to finish.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            attempts: 100,
            initiator: "concurrency-test".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    pub fn new(threads: usize, attempts: usize) -> Self {
        Self {
            threads,
            attempts,
            ..Self::default()
        }
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = initiator.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidConfig("threads must be at least 1".into()));
        }
        if self.attempts == 0 {
            return Err(HarnessError::InvalidConfig("attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome distribution of one harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyTestResult {
    pub document_id: DocumentId,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    /// `CONFLICT` and `REGISTRY_ERROR` outcomes: attempts that lost the race.
    pub conflict_attempts: usize,
    pub error_attempts: usize,
    pub final_status: DocumentStatus,
    pub registry_entries_count: u64,
    /// Attempts were still running when the wait gave up.
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl ConcurrencyTestResult {
    pub fn completed_attempts(&self) -> usize {
        self.successful_attempts + self.conflict_attempts + self.error_attempts
    }

    /// Exactly one approval won and was recorded once.
    pub fn is_linearizable(&self) -> bool {
        self.successful_attempts == 1
            && self.registry_entries_count == 1
            && self.final_status == DocumentStatus::Approved
    }
}

/// Lock-free counters shared by all attempt tasks. Attempts that finish
/// after the harness stopped waiting still land here safely.
#[derive(Debug, Default)]
struct Tally {
    success: AtomicUsize,
    conflict: AtomicUsize,
    error: AtomicUsize,
}

impl Tally {
    fn record(&self, outcome: Option<OperationStatus>) {
        let counter = match outcome {
            Some(OperationStatus::Success) => &self.success,
            Some(OperationStatus::Conflict | OperationStatus::RegistryError) => &self.conflict,
            Some(OperationStatus::NotFound) | None => &self.error,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.success.load(Ordering::SeqCst),
            self.conflict.load(Ordering::SeqCst),
            self.error.load(Ordering::SeqCst),
        )
    }
}

/// Bounded pool: at most `size` spawned jobs run at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Spawn `job` on the runtime; it starts once a worker slot is free.
    ///
    /// Dropping the returned handle detaches the job rather than cancelling it.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            job.await;
        })
    }
}

pub struct ConcurrencyHarness {
    engine: TransitionEngine,
    force_status: Arc<dyn ForceStatus>,
    purge_approval: Arc<dyn PurgeApproval>,
}

impl ConcurrencyHarness {
    pub fn new(
        engine: TransitionEngine,
        force_status: Arc<dyn ForceStatus>,
        purge_approval: Arc<dyn PurgeApproval>,
    ) -> Self {
        Self {
            engine,
            force_status,
            purge_approval,
        }
    }

    /// Race `config.attempts` approvals of `document_id` across
    /// `config.threads` workers.
    pub async fn run(
        &self,
        document_id: DocumentId,
        config: &HarnessConfig,
    ) -> Result<ConcurrencyTestResult, HarnessError> {
        config.validate()?;
        info!(
            document_id = %document_id,
            threads = config.threads,
            attempts = config.attempts,
            "starting concurrency test"
        );

        let document = self
            .engine
            .documents()
            .get(document_id)
            .await?
            .ok_or(HarnessError::NotFound(document_id))?;

        if document.status == DocumentStatus::Approved {
            warn!(document_id = %document_id, "resetting approved document to SUBMITTED for test");
            self.force_status
                .force_status(document_id, DocumentStatus::Submitted)
                .await?;
            self.purge_approval.purge(document_id).await?;
        }

        let started = Instant::now();
        let tally = Arc::new(Tally::default());
        let pool = WorkerPool::new(config.threads);

        let handles: Vec<_> = (0..config.attempts)
            .map(|_| {
                let engine = self.engine.clone();
                let tally = tally.clone();
                let request = BatchRequest::new([document_id], config.initiator.clone())
                    .with_comment(ATTEMPT_COMMENT);
                pool.spawn(async move {
                    let attempt = AssertUnwindSafe(engine.approve(&request))
                        .catch_unwind()
                        .await;
                    let outcome = match attempt {
                        Ok(Ok(results)) => results.first().map(|r| r.status),
                        Ok(Err(err)) => {
                            error!(error = %err, "concurrency test attempt rejected");
                            None
                        }
                        Err(_) => {
                            error!("concurrency test attempt panicked");
                            None
                        }
                    };
                    tally.record(outcome);
                })
            })
            .collect();

        // In-flight attempts are not cancelled on timeout.
        let timed_out = tokio::time::timeout(config.timeout, join_all(handles))
            .await
            .is_err();
        if timed_out {
            warn!(
                document_id = %document_id,
                timeout_ms = config.timeout.as_millis() as u64,
                "concurrency test wait timed out"
            );
        }

        let (successful_attempts, conflict_attempts, error_attempts) = tally.snapshot();
        let final_status = self
            .engine
            .documents()
            .get(document_id)
            .await?
            .map_or(document.status, |d| d.status);
        let registry_entries_count = self.engine.ledger().count_for(document_id).await?;

        let result = ConcurrencyTestResult {
            document_id,
            total_attempts: config.attempts,
            successful_attempts,
            conflict_attempts,
            error_attempts,
            final_status,
            registry_entries_count,
            timed_out,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            document_id = %document_id,
            success = result.successful_attempts,
            conflict = result.conflict_attempts,
            error = result.error_attempts,
            final_status = %result.final_status,
            registry_entries = result.registry_entries_count,
            "concurrency test completed"
        );
        Ok(result)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDocument;
    use crate::store::{DocumentStore, MemoryBackend};

    #[test]
    fn tally_buckets_losing_outcomes_together() {
        let tally = Tally::default();
        tally.record(Some(OperationStatus::Success));
        tally.record(Some(OperationStatus::Conflict));
        tally.record(Some(OperationStatus::RegistryError));
        tally.record(Some(OperationStatus::NotFound));
        tally.record(None);

        assert_eq!(tally.snapshot(), (1, 2, 2));
    }

    #[tokio::test]
    async fn rejects_zero_threads_or_attempts() {
        let backend = MemoryBackend::new();
        let harness = backend.harness();

        let zero_threads = harness.run(DocumentId(1), &HarnessConfig::new(0, 5)).await;
        assert!(matches!(zero_threads, Err(HarnessError::InvalidConfig(_))));

        let zero_attempts = harness.run(DocumentId(1), &HarnessConfig::new(5, 0)).await;
        assert!(matches!(zero_attempts, Err(HarnessError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let backend = MemoryBackend::new();
        let result = backend
            .harness()
            .run(DocumentId(404), &HarnessConfig::new(2, 2))
            .await;
        assert!(matches!(result, Err(HarnessError::NotFound(DocumentId(404)))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_pool_caps_concurrency() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        join_all(handles).await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn draft_document_yields_no_success() {
        let backend = MemoryBackend::new();
        let doc = backend
            .documents
            .create(NewDocument::new("alice", "draft"))
            .await
            .unwrap();

        let result = backend
            .harness()
            .run(doc.id, &HarnessConfig::new(4, 12))
            .await
            .unwrap();

        assert_eq!(result.successful_attempts, 0);
        assert_eq!(result.conflict_attempts, 12);
        assert_eq!(result.final_status, DocumentStatus::Draft);
        assert_eq!(result.registry_entries_count, 0);
        assert!(!result.is_linearizable());
    }

    #[test]
    fn config_serializes_timeout_as_millis() {
        let config = HarnessConfig::default().with_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1500);
        assert_eq!(json["initiator"], "concurrency-test");
    }
}
