use std::path::Path;
use std::sync::Arc;

use analytica::adapters::CsvExportAdapter;
use analytica::config::SourceRegistry;
use analytica::pipeline::{
    BatchArea, BatchStore, Decision, EtlPipeline, FsBatchStore, GateConfig, GateOutcome, Loader,
    SqliteStore, ValidationGate,
};
use chrono::{TimeZone, Utc};
use rusqlite::Connection;

const SOURCES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/sources.json");
const DEMO_EXPORT: &str = include_str!("../../../demos/creb_2025-05.csv");

fn build(root: &Path) -> (Arc<FsBatchStore>, EtlPipeline<FsBatchStore, SqliteStore>) {
    let registry = Arc::new(SourceRegistry::load(Path::new(SOURCES)).expect("sources load"));
    let batches = Arc::new(FsBatchStore::open(root.join("validation")).expect("store opens"));
    let gate = Arc::new(
        ValidationGate::new(batches.clone(), registry.clone(), GateConfig::default())
            .expect("gate opens"),
    );
    let loader = Loader::new(
        Arc::new(SqliteStore::new(root.join("analytica.db"))),
        registry.table_schemas(),
    );
    (batches, EtlPipeline::new(gate, loader))
}

#[test]
fn demo_export_flows_from_extraction_to_store() {
    let dir = tempfile::tempdir().unwrap();
    let (batches, pipeline) = build(dir.path());
    let batch = CsvExportAdapter::new("creb")
        .extract(
            DEMO_EXPORT.as_bytes(),
            Utc.with_ymd_and_hms(2025, 6, 3, 9, 0, 0).unwrap(),
        )
        .unwrap();

    let batch_id = pipeline.gate().stage(&batch).unwrap();
    let outcome = pipeline.gate().auto_evaluate(&batch_id, None).unwrap();
    assert!(
        matches!(outcome, GateOutcome::AutoApproved { .. }),
        "{:?}",
        outcome.report().findings
    );

    let run = pipeline.run_load().unwrap();
    assert_eq!(run.summary.inserted(), 5);
    assert_eq!(batches.locate(&batch_id).unwrap(), Some(BatchArea::Loaded));

    let conn = Connection::open(dir.path().join("analytica.db")).unwrap();
    let (date, price, source, status, score): (String, i64, String, String, f64) = conn
        .query_row(
            "SELECT date, benchmark_price, source_name, validation_status, confidence_score \
             FROM housing_city_monthly WHERE property_type = 'Detached'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .unwrap();
    assert_eq!(date, "2025-05-01");
    assert_eq!(price, 785_600);
    assert_eq!(source, "creb");
    assert_eq!(status, "approved");
    assert_eq!(score, 1.0);
}

#[test]
fn approved_batches_wait_for_the_next_load_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let batch_id = {
        let (_, pipeline) = build(dir.path());
        let batch = CsvExportAdapter::new("creb")
            .extract(DEMO_EXPORT.as_bytes(), Utc::now())
            .unwrap();
        let batch_id = pipeline.gate().stage(&batch).unwrap();
        pipeline
            .gate()
            .decide(&batch_id, Decision::Approved, None)
            .unwrap();
        batch_id
    };

    let (batches, pipeline) = build(dir.path());
    let run = pipeline.run_load().unwrap();

    assert_eq!(run.batches, vec![batch_id.clone()]);
    assert_eq!(batches.locate(&batch_id).unwrap(), Some(BatchArea::Loaded));
    assert_eq!(
        pipeline.loader().table_counts().unwrap()["housing_city_monthly"],
        5
    );
}

#[test]
fn district_rows_keep_the_full_source_name() {
    let dir = tempfile::tempdir().unwrap();
    let (_, pipeline) = build(dir.path());
    let export = "Date,Property_Type,District,Benchmark_Price,Months_Supply\n\
        2025-05,Detached,City Centre,\"$912,300\",2.1\n\
        2025-05,Detached,North East,\"$598,700\",1.8\n";
    let batch = CsvExportAdapter::new("creb_district")
        .extract(export.as_bytes(), Utc::now())
        .unwrap();
    let batch_id = pipeline.gate().stage(&batch).unwrap();
    assert!(matches!(
        pipeline.gate().auto_evaluate(&batch_id, None).unwrap(),
        GateOutcome::NeedsReview { .. }
    ));
    pipeline
        .gate()
        .decide(&batch_id, Decision::Approved, Some("partial district table".to_string()))
        .unwrap();

    pipeline.run_load().unwrap();

    let conn = Connection::open(dir.path().join("analytica.db")).unwrap();
    let sources: Vec<String> = conn
        .prepare("SELECT DISTINCT source_name FROM housing_district_monthly")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(sources, vec!["creb_district".to_string()]);
}
