use analytica::config::AppConfig;
use analytica::error::AppError;
use analytica::pipeline::{EtlPipeline, FsBatchStore, Loader, SqliteStore, ValidationGate};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type Pipeline = EtlPipeline<FsBatchStore, SqliteStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wire the batch areas, the destination store and the source registry.
/// Opening the gate completes any move an earlier process left half-done.
pub(crate) fn build_pipeline(config: &AppConfig) -> Result<Arc<Pipeline>, AppError> {
    let sources = Arc::new(config.sources()?);
    let batches = Arc::new(FsBatchStore::open(config.validation.data_dir.clone())?);

    let database_path = &config.store.database_path;
    if let Some(parent) = database_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }
    let records = Arc::new(
        SqliteStore::new(database_path.clone()).with_busy_timeout(config.store.busy_timeout),
    );

    let gate = Arc::new(ValidationGate::new(
        batches,
        sources.clone(),
        config.validation.gate,
    )?);
    let loader = Loader::new(records, sources.table_schemas());

    tracing::debug!(
        data_dir = %config.validation.data_dir.display(),
        database = %database_path.display(),
        sources = sources.names().count(),
        "pipeline assembled"
    );
    Ok(Arc::new(EtlPipeline::new(gate, loader)))
}
