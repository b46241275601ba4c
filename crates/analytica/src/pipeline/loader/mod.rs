mod schema;
mod sqlite;

pub use schema::{is_identifier, ColumnSpec, TableSchema, METADATA_COLUMNS};
pub use sqlite::SqliteStore;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::domain::{CanonicalRecord, NaturalKey, ValidationStatus};

/// Storage abstraction for the destination analytical store.
pub trait RecordStore: Send + Sync {
    fn ensure_schema(&self, tables: &[TableSchema]) -> Result<(), LoadError>;
    /// Upsert all records in one transaction; nothing is kept on error.
    fn upsert(
        &self,
        tables: &[TableSchema],
        records: &[CanonicalRecord],
    ) -> Result<LoadSummary, LoadError>;
    fn table_counts(&self, tables: &[TableSchema]) -> Result<BTreeMap<String, u64>, LoadError>;
}

/// Error raised while writing to the destination store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("load invariant violated: {detail}")]
    InvariantViolation {
        key: Option<NaturalKey>,
        detail: String,
    },
    #[error("destination store unavailable: {detail}")]
    StoreUnavailable { detail: String },
    #[error("no destination table '{0}' is configured")]
    UnknownTable(String),
    #[error("destination store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Row outcome for one destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Per-table and total row outcome of a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub tables: BTreeMap<String, TableLoad>,
}

impl LoadSummary {
    pub fn inserted(&self) -> usize {
        self.tables.values().map(|table| table.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.tables.values().map(|table| table.updated).sum()
    }

    pub fn unchanged(&self) -> usize {
        self.tables.values().map(|table| table.unchanged).sum()
    }

    pub fn total(&self) -> usize {
        self.inserted() + self.updated() + self.unchanged()
    }
}

/// Validates a merged record set and hands it to the store.
pub struct Loader<D> {
    store: Arc<D>,
    tables: Vec<TableSchema>,
}

impl<D> Loader<D>
where
    D: RecordStore + 'static,
{
    pub fn new(store: Arc<D>, tables: Vec<TableSchema>) -> Self {
        Self { store, tables }
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn prepare(&self) -> Result<(), LoadError> {
        self.store.ensure_schema(&self.tables)
    }

    /// Records must be approved, unique by natural key and bound for a
    /// known table; anything else aborts before the store is touched.
    pub fn load(&self, records: &[CanonicalRecord]) -> Result<LoadSummary, LoadError> {
        let known: HashSet<&str> = self.tables.iter().map(|table| table.name.as_str()).collect();
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            if !known.contains(record.natural_key.table.as_str()) {
                return Err(LoadError::UnknownTable(record.natural_key.table.clone()));
            }
            if record.validation_status != ValidationStatus::Approved {
                return Err(LoadError::InvariantViolation {
                    key: Some(record.natural_key.clone()),
                    detail: format!(
                        "{} from batch {} is {}, not approved",
                        record.natural_key,
                        record.batch_id,
                        record.validation_status.label()
                    ),
                });
            }
            if !seen.insert(&record.natural_key) {
                return Err(LoadError::InvariantViolation {
                    key: Some(record.natural_key.clone()),
                    detail: format!("{} appears more than once in the load set", record.natural_key),
                });
            }
        }

        let summary = self.store.upsert(&self.tables, records)?;
        tracing::info!(
            inserted = summary.inserted(),
            updated = summary.updated(),
            unchanged = summary.unchanged(),
            "records loaded"
        );
        Ok(summary)
    }

    pub fn table_counts(&self) -> Result<BTreeMap<String, u64>, LoadError> {
        self.store.table_counts(&self.tables)
    }
}
