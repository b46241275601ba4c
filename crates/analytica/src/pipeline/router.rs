use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::domain::{Decision, ValidationDecision};
use super::gate::{parse_batch_id, AreaSummary, BatchStore, GateOutcome, PendingBatch};
use super::loader::RecordStore;
use super::{EtlPipeline, LoadRun, PipelineError};
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EvaluateRequest {
    #[serde(default)]
    pub(crate) threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    pub(crate) decision: Decision,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PendingResponse {
    pub(crate) batches: Vec<PendingBatch>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HistoryResponse {
    pub(crate) decisions: Vec<ValidationDecision>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) areas: AreaSummary,
    pub(crate) tables: std::collections::BTreeMap<String, u64>,
}

/// Router builder exposing the reviewer endpoints of the gate.
pub fn review_router<S, D>(pipeline: Arc<EtlPipeline<S, D>>) -> Router
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    Router::new()
        .route("/api/v1/batches/pending", get(pending_handler::<S, D>))
        .route("/api/v1/batches/history", get(history_handler::<S, D>))
        .route(
            "/api/v1/batches/:batch_id/evaluate",
            post(evaluate_handler::<S, D>),
        )
        .route(
            "/api/v1/batches/:batch_id/decision",
            post(decision_handler::<S, D>),
        )
        .route("/api/v1/load", post(load_handler::<S, D>))
        .route("/api/v1/status", get(status_handler::<S, D>))
        .with_state(pipeline)
}

pub(crate) async fn pending_handler<S, D>(
    State(pipeline): State<Arc<EtlPipeline<S, D>>>,
) -> Result<Json<PendingResponse>, AppError>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    let batches = pipeline
        .gate()
        .list_pending()?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(PendingResponse { batches }))
}

pub(crate) async fn history_handler<S, D>(
    State(pipeline): State<Arc<EtlPipeline<S, D>>>,
) -> Result<Json<HistoryResponse>, AppError>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    let decisions = pipeline.gate().history()?;
    Ok(Json(HistoryResponse { decisions }))
}

pub(crate) async fn evaluate_handler<S, D>(
    State(pipeline): State<Arc<EtlPipeline<S, D>>>,
    Path(batch_id): Path<String>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<GateOutcome>, AppError>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    let outcome = pipeline
        .gate()
        .auto_evaluate(&parse_batch_id(batch_id)?, request.threshold)?;
    Ok(Json(outcome))
}

pub(crate) async fn decision_handler<S, D>(
    State(pipeline): State<Arc<EtlPipeline<S, D>>>,
    Path(batch_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ValidationDecision>, AppError>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    let decision = pipeline
        .gate()
        .decide(&parse_batch_id(batch_id)?, request.decision, request.reason)?;
    Ok(Json(decision))
}

pub(crate) async fn load_handler<S, D>(
    State(pipeline): State<Arc<EtlPipeline<S, D>>>,
) -> Result<(StatusCode, Json<LoadRun>), AppError>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    let run = pipeline.run_load().map_err(|err: PipelineError| {
        tracing::error!(kind = err.kind().label(), error = %err, "load run failed");
        err
    })?;
    Ok((StatusCode::OK, Json(run)))
}

pub(crate) async fn status_handler<S, D>(
    State(pipeline): State<Arc<EtlPipeline<S, D>>>,
) -> Result<Json<StatusResponse>, AppError>
where
    S: BatchStore + 'static,
    D: RecordStore + 'static,
{
    let areas = pipeline.gate().summary()?;
    let tables = pipeline.loader().table_counts()?;
    Ok(Json(StatusResponse { areas, tables }))
}
