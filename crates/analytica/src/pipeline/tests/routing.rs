use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::pipeline::domain::Decision;
use crate::pipeline::gate::{BatchArea, BatchStore};
use crate::pipeline::review_router;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body collects");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn pending_route_lists_staged_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (_, pipeline) = sqlite_pipeline(dir.path());
    let batch_id = pipeline.gate().stage(&complete_creb_batch(9)).unwrap();
    let router = review_router(Arc::new(pipeline));

    let response = router
        .oneshot(
            Request::get("/api/v1/batches/pending")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["batches"][0]["batch_id"], json!(batch_id.as_str()));
    assert_eq!(body["batches"][0]["row_count"], json!(5));
}

#[tokio::test]
async fn evaluate_route_returns_not_found_for_unknown_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (_, pipeline) = sqlite_pipeline(dir.path());
    let router = review_router(Arc::new(pipeline));

    let response = router
        .oneshot(post("/api/v1/batches/creb_missing/evaluate", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["kind"], json!("unknown_batch"));
}

#[tokio::test]
async fn decision_route_conflicts_on_decided_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (_, pipeline) = sqlite_pipeline(dir.path());
    let batch_id = pipeline.gate().stage(&complete_creb_batch(9)).unwrap();
    pipeline
        .gate()
        .decide(&batch_id, Decision::Approved, None)
        .unwrap();
    let router = review_router(Arc::new(pipeline));

    let response = router
        .oneshot(post(
            &format!("/api/v1/batches/{batch_id}/decision"),
            json!({ "decision": "rejected", "reason": "second thoughts" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["kind"], json!("invalid_transition"));
    assert_eq!(body["batch_id"], json!(batch_id.as_str()));
}

#[tokio::test]
async fn evaluate_then_load_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (_, pipeline) = sqlite_pipeline(dir.path());
    let batch_id = pipeline.gate().stage(&complete_creb_batch(9)).unwrap();
    let router = review_router(Arc::new(pipeline));

    let evaluated = router
        .clone()
        .oneshot(post(
            &format!("/api/v1/batches/{batch_id}/evaluate"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(evaluated.status(), StatusCode::OK);
    assert_eq!(body_json(evaluated).await["outcome"], json!("auto_approved"));

    let loaded = router
        .clone()
        .oneshot(post("/api/v1/load", json!({})))
        .await
        .unwrap();
    assert_eq!(loaded.status(), StatusCode::OK);
    let body = body_json(loaded).await;
    assert_eq!(body["summary"]["tables"]["housing_city_monthly"]["inserted"], json!(5));

    let status = router
        .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(status).await;
    assert_eq!(body["areas"]["loaded"], json!(1));
    assert_eq!(body["tables"]["housing_city_monthly"], json!(5));
}

#[tokio::test]
async fn decision_route_refuses_encoded_relative_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (store, pipeline) = sqlite_pipeline(dir.path());
    let batch_id = pipeline.gate().stage(&complete_creb_batch(9)).unwrap();
    pipeline
        .gate()
        .decide(&batch_id, Decision::Rejected, Some("wrong month".to_string()))
        .unwrap();
    let router = review_router(Arc::new(pipeline));

    let response = router
        .oneshot(post(
            &format!("/api/v1/batches/..%2Frejected%2F{batch_id}/decision"),
            json!({ "decision": "approved", "reason": "override" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["kind"], json!("unknown_batch"));
    let decision = store
        .read_decision(BatchArea::Rejected, &batch_id)
        .unwrap()
        .expect("decision kept");
    assert_eq!(decision.decision, Decision::Rejected);
}
