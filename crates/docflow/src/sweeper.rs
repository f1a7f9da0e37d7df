//! Periodic sweepers that drive pending documents through the engine.
//!
//! A sweeper owns no transition logic. It pages through documents in its
//! source status and hands each page to [`TransitionEngine`] as one batch.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::batch::{BatchRequest, BatchSummary, OperationStatus, MAX_BATCH_SIZE};
use crate::engine::TransitionEngine;
use crate::error::SweepError;
use crate::model::{DocumentAction, DocumentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepKind {
    Submit,
    Approve,
}

impl SweepKind {
    pub fn action(&self) -> DocumentAction {
        match self {
            Self::Submit => DocumentAction::Submit,
            Self::Approve => DocumentAction::Approve,
        }
    }

    pub fn source_status(&self) -> DocumentStatus {
        self.action().source_status()
    }

    pub fn initiator(&self) -> &'static str {
        match self {
            Self::Submit => "SUBMIT-WORKER",
            Self::Approve => "APPROVE-WORKER",
        }
    }

    pub fn comment(&self) -> &'static str {
        match self {
            Self::Submit => "Auto-submitted by background worker",
            Self::Approve => "Auto-approved by background worker",
        }
    }
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.initiator())
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Documents fetched and processed per batch, capped at [`MAX_BATCH_SIZE`].
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Totals for one sweep cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub pages: usize,
    pub processed: usize,
    pub outcomes: BatchSummary,
    pub duration_ms: u64,
}

pub struct Sweeper {
    kind: SweepKind,
    engine: TransitionEngine,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(kind: SweepKind, engine: TransitionEngine, config: SweeperConfig) -> Self {
        Self {
            kind,
            engine,
            config,
        }
    }

    pub fn submitter(engine: TransitionEngine, config: SweeperConfig) -> Self {
        Self::new(SweepKind::Submit, engine, config)
    }

    pub fn approver(engine: TransitionEngine, config: SweeperConfig) -> Self {
        Self::new(SweepKind::Approve, engine, config)
    }

    pub fn kind(&self) -> SweepKind {
        self.kind
    }

    fn page_size(&self) -> usize {
        self.config.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    /// Run one cycle until the source status is exhausted.
    ///
    /// After each page the offset moves past the documents of that page that
    /// are still in the source status, so a page that keeps failing cannot
    /// stall the cycle. Documents that left the source status for any reason
    /// no longer occupy a slot and are not counted.
    pub async fn sweep_once(&self) -> Result<SweepReport, SweepError> {
        let started = Instant::now();
        let status = self.kind.source_status();
        let page_size = self.page_size();
        info!(sweeper = %self.kind, "sweep started, checking for {status} documents");

        let mut report = SweepReport::default();
        let mut offset = 0;
        loop {
            let page = self
                .engine
                .documents()
                .scan_by_status(status, offset, page_size)
                .await
                .map_err(|source| SweepError::Fetch { status, source })?;

            if page.is_empty() {
                info!(sweeper = %self.kind, "no more {status} documents found");
                break;
            }

            let request = BatchRequest::new(page.iter().map(|d| d.id), self.kind.initiator())
                .with_comment(self.kind.comment());
            let results = match self.kind {
                SweepKind::Submit => self.engine.submit(&request).await?,
                SweepKind::Approve => self.engine.approve(&request).await?,
            };

            let summary = BatchSummary::of(&results);
            info!(
                sweeper = %self.kind,
                size = page.len(),
                success = summary.success,
                conflict = summary.conflict,
                not_found = summary.not_found,
                registry_error = summary.registry_error,
                "batch results"
            );
            for result in results.iter().filter(|r| r.status != OperationStatus::Success) {
                warn!(
                    sweeper = %self.kind,
                    document_id = %result.document_id,
                    status = %result.status,
                    "{}",
                    result.message
                );
            }

            let ids: Vec<_> = page.iter().map(|d| d.id).collect();
            let still_pending = self
                .engine
                .documents()
                .get_many(&ids)
                .await
                .map_err(|source| SweepError::Fetch { status, source })?
                .iter()
                .filter(|d| d.status == status)
                .count();

            report.pages += 1;
            report.processed += page.len();
            report.outcomes.merge(summary);
            offset += still_pending;

            if page.len() < page_size {
                break;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            sweeper = %self.kind,
            processed = report.processed,
            success = report.outcomes.success,
            failed = report.outcomes.conflict + report.outcomes.not_found,
            registry_errors = report.outcomes.registry_error,
            duration_ms = report.duration_ms,
            "sweep completed"
        );
        Ok(report)
    }

    /// Run cycles on a fixed delay until `shutdown` turns `true`.
    ///
    /// A failed cycle is logged and the next one starts from scratch.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }

                if let Err(err) = self.sweep_once().await {
                    error!(sweeper = %self.kind, error = %err, "sweep encountered an error");
                }
            }
            info!(sweeper = %self.kind, "sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDocument;
    use crate::store::{DocumentStore, MemoryBackend};

    async fn seed_drafts(backend: &MemoryBackend, n: usize) {
        for i in 0..n {
            backend
                .documents
                .create(NewDocument::new("alice", format!("doc {i}")))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn submit_sweep_pages_until_exhausted() {
        let backend = MemoryBackend::new();
        seed_drafts(&backend, 25).await;
        let sweeper = Sweeper::submitter(
            backend.engine(),
            SweeperConfig {
                batch_size: 10,
                ..SweeperConfig::default()
            },
        );

        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.processed, 25);
        assert_eq!(report.outcomes.success, 25);
        let drafts = backend.documents.count_by_status(DocumentStatus::Draft).await;
        assert_eq!(drafts.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_store_sweeps_nothing() {
        let backend = MemoryBackend::new();
        let report = Sweeper::approver(backend.engine(), SweeperConfig::default())
            .sweep_once()
            .await
            .unwrap();
        assert_eq!(report.pages, 0);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_stops_on_empty_page() {
        let backend = MemoryBackend::new();
        seed_drafts(&backend, 20).await;
        let sweeper = Sweeper::submitter(
            backend.engine(),
            SweeperConfig {
                batch_size: 10,
                ..SweeperConfig::default()
            },
        );

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.outcomes.success, 20);
    }

    #[tokio::test]
    async fn sweeper_initiator_lands_in_history() {
        let backend = MemoryBackend::new();
        seed_drafts(&backend, 1).await;
        let engine = backend.engine();

        Sweeper::submitter(engine.clone(), SweeperConfig::default())
            .sweep_once()
            .await
            .unwrap();
        Sweeper::approver(engine.clone(), SweeperConfig::default())
            .sweep_once()
            .await
            .unwrap();

        let doc = backend
            .documents
            .scan_by_status(DocumentStatus::Approved, 0, 10)
            .await
            .unwrap();
        assert_eq!(doc.len(), 1);
        let view = engine.document_with_history(doc[0].id).await.unwrap().unwrap();
        assert_eq!(view.history[0].initiator, "APPROVE-WORKER");
        assert_eq!(view.history[1].initiator, "SUBMIT-WORKER");
        assert_eq!(
            view.history[1].comment.as_deref(),
            Some("Auto-submitted by background worker")
        );
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_and_stops_on_shutdown() {
        let backend = MemoryBackend::new();
        seed_drafts(&backend, 3).await;
        let (tx, rx) = watch::channel(false);

        let handle = Sweeper::submitter(
            backend.engine(),
            SweeperConfig {
                interval: Duration::from_secs(5),
                batch_size: 10,
            },
        )
        .spawn(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            backend
                .documents
                .count_by_status(DocumentStatus::Submitted)
                .await
                .unwrap(),
            3
        );

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
