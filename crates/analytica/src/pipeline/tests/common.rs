use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::config::SourceRegistry;
use crate::pipeline::domain::{BatchId, RawBatch, RawRow, ValidationDecision};
use crate::pipeline::gate::{BatchArea, BatchStore, BatchStoreError, GateConfig, ValidationGate};
use crate::pipeline::loader::{LoadError, LoadSummary, Loader, RecordStore, SqliteStore, TableSchema};
use crate::pipeline::scoring::ScoreReport;
use crate::pipeline::EtlPipeline;

pub(super) const SOURCES: &str = r#"{
    "sources": {
        "creb": {
            "table": "housing_city_monthly",
            "fields": [
                { "column": "Date", "field": "date", "type": "date", "required": true, "key": true },
                { "column": "Property_Type", "field": "property_type", "type": "string", "required": true, "key": true },
                { "column": "Sales", "field": "sales", "type": "integer" },
                { "column": "Benchmark_Price", "field": "benchmark_price", "type": "integer" }
            ],
            "expectations": {
                "expected_rows": { "min": 5, "max": 5 },
                "required_fields": ["date", "property_type", "benchmark_price"],
                "bounds": { "benchmark_price": { "min": 100000, "max": 2000000 } }
            }
        },
        "crime": {
            "table": "crime_statistics_monthly",
            "fields": [
                { "column": "Date", "field": "date", "type": "date", "required": true, "key": true },
                { "column": "Community", "field": "community", "type": "string", "required": true, "key": true },
                { "column": "Category", "field": "crime_category", "type": "string", "required": true, "key": true },
                { "column": "Crime Count", "field": "incident_count", "type": "float", "required": true }
            ],
            "suppression": { "markers": ["<5"], "substitute": 2.5 }
        }
    }
}"#;

pub(super) const PROPERTY_TYPES: [&str; 5] = ["Total", "Detached", "Semi_detached", "Row", "Apartment"];

pub(super) fn registry() -> Arc<SourceRegistry> {
    Arc::new(SourceRegistry::from_json_str(SOURCES).expect("test sources are valid"))
}

pub(super) fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 3, hour, 0, 0).unwrap()
}

fn row(pairs: &[(&str, &str)]) -> RawRow {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), json!(value)))
        .collect()
}

/// CREB city export with one row per property type and the given prices.
pub(super) fn creb_batch(hour: u32, prices: &[&str]) -> RawBatch {
    let rows = prices
        .iter()
        .zip(PROPERTY_TYPES.iter())
        .map(|(price, property_type)| {
            row(&[
                ("Date", "2025-05"),
                ("Property_Type", property_type),
                ("Sales", "1,204"),
                ("Benchmark_Price", price),
            ])
        })
        .collect();
    RawBatch::new("creb", at(hour), rows)
}

pub(super) fn complete_creb_batch(hour: u32) -> RawBatch {
    creb_batch(hour, &["$585,000", "785600", "690,100", "455000", "330,200"])
}

pub(super) fn crime_batch(hour: u32) -> RawBatch {
    let rows = vec![
        row(&[
            ("Date", "2025-05-01"),
            ("Community", "Beltline"),
            ("Category", "Theft"),
            ("Crime Count", "41"),
        ]),
        row(&[
            ("Date", "2025-05-01"),
            ("Community", "Bowness"),
            ("Category", "Theft"),
            ("Crime Count", "<5"),
        ]),
    ];
    RawBatch::new("crime", at(hour), rows)
}

pub(super) fn gate_with(store: Arc<MemoryBatchStore>) -> ValidationGate<MemoryBatchStore> {
    ValidationGate::new(store, registry(), GateConfig::default()).expect("gate builds")
}

pub(super) fn sqlite_pipeline(
    dir: &Path,
) -> (Arc<MemoryBatchStore>, EtlPipeline<MemoryBatchStore, SqliteStore>) {
    let store = Arc::new(MemoryBatchStore::default());
    let gate = Arc::new(gate_with(store.clone()));
    let loader = Loader::new(
        Arc::new(SqliteStore::new(dir.join("analytica.db"))),
        registry().table_schemas(),
    );
    (store, EtlPipeline::new(gate, loader))
}

#[derive(Debug, Clone)]
struct StoredBatch {
    area: BatchArea,
    batch: RawBatch,
    report: Option<ScoreReport>,
    decision: Option<ValidationDecision>,
}

/// In-memory batch store. `fail_moves` simulates a crash between writing
/// a decision and moving the batch.
#[derive(Default)]
pub(super) struct MemoryBatchStore {
    batches: Mutex<HashMap<BatchId, StoredBatch>>,
    fail_moves: AtomicBool,
}

impl MemoryBatchStore {
    pub(super) fn fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    fn in_area<T>(
        &self,
        area: BatchArea,
        id: &BatchId,
        read: impl FnOnce(&StoredBatch) -> T,
    ) -> Result<T, BatchStoreError> {
        let guard = self.batches.lock().expect("store mutex poisoned");
        match guard.get(id) {
            Some(stored) if stored.area == area => Ok(read(stored)),
            _ => Err(BatchStoreError::NotFound {
                id: id.clone(),
                area,
            }),
        }
    }

    fn update_pending(
        &self,
        id: &BatchId,
        update: impl FnOnce(&mut StoredBatch),
    ) -> Result<(), BatchStoreError> {
        let mut guard = self.batches.lock().expect("store mutex poisoned");
        match guard.get_mut(id) {
            Some(stored) if stored.area == BatchArea::Pending => {
                update(stored);
                Ok(())
            }
            _ => Err(BatchStoreError::NotFound {
                id: id.clone(),
                area: BatchArea::Pending,
            }),
        }
    }
}

impl BatchStore for MemoryBatchStore {
    fn create_pending(&self, batch: &RawBatch) -> Result<BatchId, BatchStoreError> {
        let id = batch.id();
        let mut guard = self.batches.lock().expect("store mutex poisoned");
        if guard.contains_key(&id) {
            return Err(BatchStoreError::AlreadyExists(id));
        }
        guard.insert(
            id.clone(),
            StoredBatch {
                area: BatchArea::Pending,
                batch: batch.clone(),
                report: None,
                decision: None,
            },
        );
        Ok(id)
    }

    fn locate(&self, id: &BatchId) -> Result<Option<BatchArea>, BatchStoreError> {
        let guard = self.batches.lock().expect("store mutex poisoned");
        Ok(guard.get(id).map(|stored| stored.area))
    }

    fn read_batch(&self, area: BatchArea, id: &BatchId) -> Result<RawBatch, BatchStoreError> {
        self.in_area(area, id, |stored| stored.batch.clone())
    }

    fn list(&self, area: BatchArea) -> Result<Vec<BatchId>, BatchStoreError> {
        let guard = self.batches.lock().expect("store mutex poisoned");
        let mut ids: Vec<BatchId> = guard
            .iter()
            .filter(|(_, stored)| stored.area == area)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn write_report(&self, id: &BatchId, report: &ScoreReport) -> Result<(), BatchStoreError> {
        self.update_pending(id, |stored| stored.report = Some(report.clone()))
    }

    fn read_report(
        &self,
        area: BatchArea,
        id: &BatchId,
    ) -> Result<Option<ScoreReport>, BatchStoreError> {
        self.in_area(area, id, |stored| stored.report.clone())
            .or_else(|_| Ok(None))
    }

    fn write_decision(
        &self,
        id: &BatchId,
        decision: &ValidationDecision,
    ) -> Result<(), BatchStoreError> {
        self.update_pending(id, |stored| stored.decision = Some(decision.clone()))
    }

    fn read_decision(
        &self,
        area: BatchArea,
        id: &BatchId,
    ) -> Result<Option<ValidationDecision>, BatchStoreError> {
        self.in_area(area, id, |stored| stored.decision.clone())
            .or_else(|_| Ok(None))
    }

    fn move_batch(
        &self,
        id: &BatchId,
        from: BatchArea,
        to: BatchArea,
    ) -> Result<(), BatchStoreError> {
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(BatchStoreError::Io {
                path: format!("{to}/{id}").into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated crash"),
            });
        }
        let mut guard = self.batches.lock().expect("store mutex poisoned");
        match guard.get_mut(id) {
            Some(stored) if stored.area == from => {
                stored.area = to;
                Ok(())
            }
            _ => Err(BatchStoreError::NotFound {
                id: id.clone(),
                area: from,
            }),
        }
    }
}

/// Destination that can never be reached.
pub(super) struct UnavailableStore;

impl RecordStore for UnavailableStore {
    fn ensure_schema(&self, _tables: &[TableSchema]) -> Result<(), LoadError> {
        Err(unavailable())
    }

    fn upsert(
        &self,
        _tables: &[TableSchema],
        _records: &[crate::pipeline::domain::CanonicalRecord],
    ) -> Result<LoadSummary, LoadError> {
        Err(unavailable())
    }

    fn table_counts(&self, _tables: &[TableSchema]) -> Result<BTreeMap<String, u64>, LoadError> {
        Err(unavailable())
    }
}

fn unavailable() -> LoadError {
    LoadError::StoreUnavailable {
        detail: "database is locked".to_string(),
    }
}
