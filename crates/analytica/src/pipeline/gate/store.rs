use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::pipeline::domain::{BatchId, RawBatch, ValidationDecision};
use crate::pipeline::scoring::ScoreReport;

/// Where a batch currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchArea {
    Pending,
    Approved,
    Rejected,
    Loaded,
}

impl BatchArea {
    pub const ALL: [BatchArea; 4] = [
        BatchArea::Pending,
        BatchArea::Approved,
        BatchArea::Rejected,
        BatchArea::Loaded,
    ];

    pub const fn dir_name(self) -> &'static str {
        match self {
            BatchArea::Pending => "pending",
            BatchArea::Approved => "approved",
            BatchArea::Rejected => "rejected",
            BatchArea::Loaded => "loaded",
        }
    }
}

impl fmt::Display for BatchArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Persistence for staged batches and their review artifacts.
///
/// Every batch lives in exactly one area. Implementations must make
/// `create_pending` and `move_batch` atomic: a batch is either fully in
/// the source area or fully in the destination.
pub trait BatchStore: Send + Sync {
    fn create_pending(&self, batch: &RawBatch) -> Result<BatchId, BatchStoreError>;
    fn locate(&self, id: &BatchId) -> Result<Option<BatchArea>, BatchStoreError>;
    fn read_batch(&self, area: BatchArea, id: &BatchId) -> Result<RawBatch, BatchStoreError>;
    /// Batch ids in the area, sorted ascending.
    fn list(&self, area: BatchArea) -> Result<Vec<BatchId>, BatchStoreError>;
    fn write_report(&self, id: &BatchId, report: &ScoreReport) -> Result<(), BatchStoreError>;
    fn read_report(
        &self,
        area: BatchArea,
        id: &BatchId,
    ) -> Result<Option<ScoreReport>, BatchStoreError>;
    /// Persist the decision inside the still-pending batch.
    fn write_decision(
        &self,
        id: &BatchId,
        decision: &ValidationDecision,
    ) -> Result<(), BatchStoreError>;
    fn read_decision(
        &self,
        area: BatchArea,
        id: &BatchId,
    ) -> Result<Option<ValidationDecision>, BatchStoreError>;
    fn move_batch(&self, id: &BatchId, from: BatchArea, to: BatchArea)
        -> Result<(), BatchStoreError>;
}

/// Error enumeration for batch store failures.
#[derive(Debug, thiserror::Error)]
pub enum BatchStoreError {
    #[error("batch {0} already exists")]
    AlreadyExists(BatchId),
    #[error("batch {id} not found in {area}")]
    NotFound { id: BatchId, area: BatchArea },
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed file {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
