//! Extract → validate → merge → load.
//!
//! Adapters produce [`RawBatch`]es which the [`ValidationGate`] stages and
//! scores. Approved batches are drained by [`EtlPipeline::run_load`]:
//! normalized again, merged by natural key and upserted in one
//! transaction.

pub mod domain;
pub mod gate;
pub mod loader;
pub mod merge;
pub mod normalizer;
pub mod router;
pub mod scoring;

#[cfg(test)]
mod tests;

pub use domain::{
    BatchId, CanonicalRecord, DecidedBy, Decision, FieldValue, NaturalKey, RawBatch, RawRow,
    ValidationDecision, ValidationStatus,
};
pub use gate::{
    ApprovedBatch, AreaSummary, BatchArea, BatchStore, BatchStoreError, FsBatchStore, GateConfig,
    GateError, GateOutcome, PendingBatch, ValidationGate, parse_batch_id,
};
pub use loader::{LoadError, LoadSummary, Loader, RecordStore, SqliteStore, TableSchema};
pub use merge::{merge_records, MergeOutcome};
pub use normalizer::{MalformedRecord, NormalizedBatch, RecordNormalizer};
pub use router::review_router;
pub use scoring::{ConfidenceScorer, ScoreReport};

use std::sync::Arc;

use serde::Serialize;

use crate::config::SourceProfile;

/// Normalize and score a batch against its source profile.
pub fn assess_batch(profile: &SourceProfile, batch: &RawBatch) -> (NormalizedBatch, ScoreReport) {
    let normalized = RecordNormalizer::new(&profile.mapping).normalize_batch(batch);
    let report = ConfidenceScorer::new(profile.weights).score(&normalized, &profile.expectations);
    (normalized, report)
}

/// Coarse classification shared by the CLI and the review API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedRecord,
    DuplicateBatch,
    InvalidTransition,
    LoadInvariantViolation,
    StoreUnavailable,
    UnknownBatch,
    UnknownSource,
    Storage,
    Config,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::MalformedRecord => "malformed_record",
            ErrorKind::DuplicateBatch => "duplicate_batch",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::LoadInvariantViolation => "load_invariant_violation",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::UnknownBatch => "unknown_batch",
            ErrorKind::UnknownSource => "unknown_source",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
        }
    }

    /// Worth retrying without operator action.
    pub const fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable)
    }
}

/// Error raised by the pipeline service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Gate(err) => match err {
                GateError::DuplicateBatch { .. } => ErrorKind::DuplicateBatch,
                GateError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                GateError::UnknownBatch(_) => ErrorKind::UnknownBatch,
                GateError::UnknownSource(_) => ErrorKind::UnknownSource,
                GateError::InvalidThreshold(_) => ErrorKind::Config,
                GateError::Store(_) => ErrorKind::Storage,
            },
            PipelineError::Load(err) => match err {
                LoadError::InvariantViolation { .. } => ErrorKind::LoadInvariantViolation,
                LoadError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
                LoadError::UnknownTable(_) => ErrorKind::Config,
                LoadError::Sqlite(_) => ErrorKind::Storage,
            },
        }
    }

    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            PipelineError::Gate(err) => err.batch_id(),
            PipelineError::Load(_) => None,
        }
    }
}

/// Outcome of one load run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadRun {
    pub batches: Vec<BatchId>,
    pub rows_rejected: usize,
    pub candidates: usize,
    pub superseded: usize,
    pub summary: LoadSummary,
}

/// Service composing the validation gate and the loader.
pub struct EtlPipeline<S, D> {
    gate: Arc<ValidationGate<S>>,
    loader: Loader<D>,
}

impl<S, D> EtlPipeline<S, D>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    pub fn new(gate: Arc<ValidationGate<S>>, loader: Loader<D>) -> Self {
        Self { gate, loader }
    }

    pub fn gate(&self) -> &Arc<ValidationGate<S>> {
        &self.gate
    }

    pub fn loader(&self) -> &Loader<D> {
        &self.loader
    }

    /// Load every approved batch. Runs under the gate's transition lock;
    /// batches are archived as `loaded` only after the transaction commits.
    pub fn run_load(&self) -> Result<LoadRun, PipelineError> {
        self.gate.drain_approved(|batches| -> Result<LoadRun, PipelineError> {
            if batches.is_empty() {
                tracing::info!("no approved batches to load");
                return Ok(LoadRun::default());
            }

            let mut run = LoadRun::default();
            let mut candidates = Vec::new();
            for approved in batches {
                let source_name = &approved.batch.source_name;
                let profile = self
                    .gate
                    .sources()
                    .profile(source_name)
                    .ok_or_else(|| GateError::UnknownSource(source_name.clone()))?;

                let (mut normalized, report) = assess_batch(profile, &approved.batch);
                normalized.mark(report.score, ValidationStatus::Approved);

                run.batches.push(normalized.batch_id.clone());
                run.rows_rejected += normalized.rows_rejected();
                candidates.extend(normalized.records);
            }

            run.candidates = candidates.len();
            let merged = merge_records(candidates);
            run.superseded = merged.superseded;
            run.summary = self.loader.load(&merged.records)?;

            tracing::info!(
                batches = run.batches.len(),
                candidates = run.candidates,
                superseded = run.superseded,
                rows_rejected = run.rows_rejected,
                "load run committed"
            );
            Ok(run)
        })
    }
}
