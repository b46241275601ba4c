//! Human-in-the-loop validation gate.
//!
//! Batches enter `pending`, receive exactly one decision and move to
//! `approved` or `rejected`. Approved batches move on to `loaded` once the
//! load stage has committed them. Every transition, and the load stage
//! itself, runs under a single transition lock held here.

mod fs;
mod store;

pub use fs::FsBatchStore;
pub use store::{BatchArea, BatchStore, BatchStoreError};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::assess_batch;
use super::domain::{BatchId, DecidedBy, Decision, RawBatch, ValidationDecision};
use super::scoring::ScoreReport;
use crate::config::{SourceProfile, SourceRegistry};

/// Default score at or above which a batch is approved without review.
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    pub auto_approve_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: DEFAULT_AUTO_APPROVE_THRESHOLD,
        }
    }
}

/// Error raised by gate operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("batch {batch_id} already exists in {area}")]
    DuplicateBatch { batch_id: BatchId, area: BatchArea },
    #[error("batch {batch_id} is {state}; cannot {attempted}")]
    InvalidTransition {
        batch_id: BatchId,
        state: BatchArea,
        attempted: &'static str,
    },
    #[error("batch {0} not found")]
    UnknownBatch(BatchId),
    #[error("source '{0}' is not configured")]
    UnknownSource(String),
    #[error("threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
    #[error(transparent)]
    Store(#[from] BatchStoreError),
}

impl GateError {
    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            GateError::DuplicateBatch { batch_id, .. }
            | GateError::InvalidTransition { batch_id, .. }
            | GateError::UnknownBatch(batch_id) => Some(batch_id),
            GateError::Store(BatchStoreError::AlreadyExists(batch_id))
            | GateError::Store(BatchStoreError::NotFound { id: batch_id, .. }) => Some(batch_id),
            _ => None,
        }
    }
}

/// Result of an automatic evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    AutoApproved {
        decision: ValidationDecision,
        report: ScoreReport,
    },
    NeedsReview {
        report: ScoreReport,
        rows_rejected: usize,
    },
}

impl GateOutcome {
    pub fn report(&self) -> &ScoreReport {
        match self {
            GateOutcome::AutoApproved { report, .. } | GateOutcome::NeedsReview { report, .. } => {
                report
            }
        }
    }
}

/// Reviewer-facing view of a pending batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingBatch {
    pub batch_id: BatchId,
    pub source_name: String,
    pub extracted_at: DateTime<Utc>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_score: Option<f64>,
    pub findings: Vec<String>,
}

/// An approved batch handed to the load stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedBatch {
    pub batch: RawBatch,
    pub decision: Option<ValidationDecision>,
}

impl ApprovedBatch {
    pub fn id(&self) -> BatchId {
        self.batch.id()
    }
}

/// Number of batches in each area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AreaSummary {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub loaded: usize,
}

pub struct ValidationGate<S> {
    store: Arc<S>,
    sources: Arc<SourceRegistry>,
    config: GateConfig,
    transitions: Mutex<()>,
}

impl<S> ValidationGate<S>
where
    S: BatchStore + 'static,
{
    /// Build the gate and complete any move a previous process left
    /// half-done.
    pub fn new(
        store: Arc<S>,
        sources: Arc<SourceRegistry>,
        config: GateConfig,
    ) -> Result<Self, GateError> {
        if !(0.0..=1.0).contains(&config.auto_approve_threshold) {
            return Err(GateError::InvalidThreshold(config.auto_approve_threshold));
        }

        let gate = Self {
            store,
            sources,
            config,
            transitions: Mutex::new(()),
        };
        {
            let _guard = gate.lock();
            gate.recover()?;
        }
        Ok(gate)
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn threshold_for(&self, source_name: &str) -> f64 {
        self.sources
            .profile(source_name)
            .and_then(|profile| profile.auto_approve_threshold)
            .unwrap_or(self.config.auto_approve_threshold)
    }

    /// Persist a new batch into `pending`. Does not take the transition
    /// lock; a concurrent stage of the same batch surfaces as a duplicate.
    pub fn stage(&self, batch: &RawBatch) -> Result<BatchId, GateError> {
        self.profile(&batch.source_name)?;

        let batch_id = batch.id();
        if let Some(area) = self.store.locate(&batch_id)? {
            return Err(GateError::DuplicateBatch { batch_id, area });
        }

        match self.store.create_pending(batch) {
            Ok(batch_id) => {
                tracing::info!(
                    batch_id = %batch_id,
                    source = %batch.source_name,
                    rows = batch.rows.len(),
                    "batch staged"
                );
                Ok(batch_id)
            }
            Err(BatchStoreError::AlreadyExists(batch_id)) => Err(GateError::DuplicateBatch {
                batch_id,
                area: BatchArea::Pending,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Score a pending batch and approve it when the score reaches the
    /// threshold (the source's own, else the gate default). The report is
    /// persisted beside the batch either way.
    pub fn auto_evaluate(
        &self,
        batch_id: &BatchId,
        threshold: Option<f64>,
    ) -> Result<GateOutcome, GateError> {
        if let Some(threshold) = threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(GateError::InvalidThreshold(threshold));
            }
        }

        let _guard = self.lock();
        self.recover()?;

        let batch = self.pending_batch(batch_id, "evaluate")?;
        let profile = self.profile(&batch.source_name)?;
        let (normalized, report) = assess_batch(profile, &batch);
        self.store.write_report(batch_id, &report)?;

        let threshold = threshold.unwrap_or_else(|| self.threshold_for(&batch.source_name));
        if report.meets(threshold) {
            let decision = ValidationDecision {
                batch_id: batch_id.clone(),
                decision: Decision::Approved,
                reason: Some(format!(
                    "score {:.3} meets threshold {threshold:.2}",
                    report.score
                )),
                decided_by: DecidedBy::Auto,
                decided_at: Utc::now(),
                confidence_score: Some(report.score),
            };
            self.commit(&decision)?;
            Ok(GateOutcome::AutoApproved { decision, report })
        } else {
            tracing::info!(
                batch_id = %batch_id,
                score = report.score,
                threshold,
                findings = report.findings.len(),
                "batch needs review"
            );
            Ok(GateOutcome::NeedsReview {
                report,
                rows_rejected: normalized.rows_rejected(),
            })
        }
    }

    /// Record a manual decision on a pending batch.
    pub fn decide(
        &self,
        batch_id: &BatchId,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<ValidationDecision, GateError> {
        let _guard = self.lock();
        self.recover()?;

        let attempted = match decision {
            Decision::Approved => "approve",
            Decision::Rejected => "reject",
        };
        self.ensure_pending(batch_id, attempted)?;
        let confidence_score = self
            .store
            .read_report(BatchArea::Pending, batch_id)?
            .map(|report| report.score);

        let decision = ValidationDecision {
            batch_id: batch_id.clone(),
            decision,
            reason: reason.filter(|reason| !reason.trim().is_empty()),
            decided_by: DecidedBy::Manual,
            decided_at: Utc::now(),
            confidence_score,
        };
        self.commit(&decision)?;
        Ok(decision)
    }

    /// Pending batches in id order. Each call starts a fresh pass; entries
    /// are read as the iterator advances.
    pub fn list_pending(&self) -> Result<PendingBatches<'_, S>, GateError> {
        let ids = self.store.list(BatchArea::Pending)?;
        Ok(PendingBatches {
            store: &self.store,
            ids: ids.into_iter(),
        })
    }

    /// Every recorded decision, oldest first.
    pub fn history(&self) -> Result<Vec<ValidationDecision>, GateError> {
        let mut decisions = Vec::new();
        for area in BatchArea::ALL {
            for batch_id in self.store.list(area)? {
                if let Some(decision) = self.store.read_decision(area, &batch_id)? {
                    decisions.push(decision);
                }
            }
        }
        decisions.sort_by(|a, b| {
            a.decided_at
                .cmp(&b.decided_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(decisions)
    }

    pub fn summary(&self) -> Result<AreaSummary, GateError> {
        Ok(AreaSummary {
            pending: self.store.list(BatchArea::Pending)?.len(),
            approved: self.store.list(BatchArea::Approved)?.len(),
            rejected: self.store.list(BatchArea::Rejected)?.len(),
            loaded: self.store.list(BatchArea::Loaded)?.len(),
        })
    }

    /// Hand every approved batch to `load` under the transition lock and
    /// archive them as `loaded` once it succeeds. On error nothing moves,
    /// so the next run retries the same set.
    pub fn drain_approved<T, E, F>(&self, load: F) -> Result<T, E>
    where
        F: FnOnce(&[ApprovedBatch]) -> Result<T, E>,
        E: From<GateError>,
    {
        let _guard = self.lock();
        self.recover()?;

        let batches = self.approved_batches()?;
        let value = load(&batches)?;

        for approved in &batches {
            let batch_id = approved.id();
            self.store
                .move_batch(&batch_id, BatchArea::Approved, BatchArea::Loaded)
                .map_err(GateError::from)?;
            tracing::debug!(batch_id = %batch_id, "batch archived as loaded");
        }
        Ok(value)
    }

    fn approved_batches(&self) -> Result<Vec<ApprovedBatch>, GateError> {
        let mut batches = Vec::new();
        for batch_id in self.store.list(BatchArea::Approved)? {
            let batch = self.store.read_batch(BatchArea::Approved, &batch_id)?;
            let decision = self.store.read_decision(BatchArea::Approved, &batch_id)?;
            batches.push(ApprovedBatch { batch, decision });
        }
        Ok(batches)
    }

    /// Finish moves interrupted after the decision was written. Caller
    /// holds the transition lock.
    fn recover(&self) -> Result<usize, GateError> {
        let mut recovered = 0;
        for batch_id in self.store.list(BatchArea::Pending)? {
            let Some(decision) = self.store.read_decision(BatchArea::Pending, &batch_id)? else {
                continue;
            };
            let target = area_for(decision.decision);
            match self.store.move_batch(&batch_id, BatchArea::Pending, target) {
                Ok(()) => {
                    recovered += 1;
                    tracing::warn!(
                        batch_id = %batch_id,
                        area = %target,
                        "completed interrupted decision move"
                    );
                }
                Err(BatchStoreError::AlreadyExists(_)) => {
                    tracing::error!(
                        batch_id = %batch_id,
                        area = %target,
                        "decided batch also present in target area; left in pending"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(recovered)
    }

    fn commit(&self, decision: &ValidationDecision) -> Result<(), GateError> {
        let target = area_for(decision.decision);
        self.store.write_decision(&decision.batch_id, decision)?;
        self.store
            .move_batch(&decision.batch_id, BatchArea::Pending, target)?;
        tracing::info!(
            batch_id = %decision.batch_id,
            decision = %decision.decision,
            score = decision.confidence_score,
            "{}",
            decision.summary()
        );
        Ok(())
    }

    fn ensure_pending(&self, batch_id: &BatchId, attempted: &'static str) -> Result<(), GateError> {
        if !batch_id.is_well_formed() {
            return Err(GateError::UnknownBatch(batch_id.clone()));
        }
        match self.store.locate(batch_id)? {
            Some(BatchArea::Pending) => Ok(()),
            Some(state) => Err(GateError::InvalidTransition {
                batch_id: batch_id.clone(),
                state,
                attempted,
            }),
            None => Err(GateError::UnknownBatch(batch_id.clone())),
        }
    }

    fn pending_batch(&self, batch_id: &BatchId, attempted: &'static str) -> Result<RawBatch, GateError> {
        self.ensure_pending(batch_id, attempted)?;
        Ok(self.store.read_batch(BatchArea::Pending, batch_id)?)
    }

    fn profile(&self, source_name: &str) -> Result<&SourceProfile, GateError> {
        self.sources
            .profile(source_name)
            .ok_or_else(|| GateError::UnknownSource(source_name.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve a batch id supplied by a reviewer. Anything `BatchId::parse`
/// refuses cannot name a staged batch.
pub fn parse_batch_id(raw: String) -> Result<BatchId, GateError> {
    BatchId::parse(&raw).ok_or_else(|| GateError::UnknownBatch(BatchId(raw)))
}

fn area_for(decision: Decision) -> BatchArea {
    match decision {
        Decision::Approved => BatchArea::Approved,
        Decision::Rejected => BatchArea::Rejected,
    }
}

/// Lazy walk over the pending area. Batches decided after the pass
/// started are skipped.
pub struct PendingBatches<'a, S> {
    store: &'a Arc<S>,
    ids: std::vec::IntoIter<BatchId>,
}

impl<S> Iterator for PendingBatches<'_, S>
where
    S: BatchStore,
{
    type Item = Result<PendingBatch, GateError>;

    fn next(&mut self) -> Option<Self::Item> {
        for batch_id in self.ids.by_ref() {
            let batch = match self.store.read_batch(BatchArea::Pending, &batch_id) {
                Ok(batch) => batch,
                Err(BatchStoreError::NotFound { .. }) => continue,
                Err(err) => return Some(Err(err.into())),
            };
            let report = match self.store.read_report(BatchArea::Pending, &batch_id) {
                Ok(report) => report,
                Err(err) => return Some(Err(err.into())),
            };
            return Some(Ok(PendingBatch {
                batch_id,
                source_name: batch.source_name,
                extracted_at: batch.extracted_at,
                row_count: batch.rows.len(),
                expected_row_count: batch.expected_row_count,
                last_score: report.as_ref().map(|report| report.score),
                findings: report.map(|report| report.findings).unwrap_or_default(),
            }));
        }
        None
    }
}
