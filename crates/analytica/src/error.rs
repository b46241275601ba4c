use crate::adapters::CsvAdapterError;
use crate::config::ConfigError;
use crate::pipeline::{BatchId, BatchStoreError, ErrorKind, GateError, LoadError, PipelineError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Pipeline(PipelineError),
    Extraction(CsvAdapterError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Pipeline(err) => err.kind(),
            AppError::Extraction(CsvAdapterError::Io(_)) => ErrorKind::Storage,
            AppError::Extraction(CsvAdapterError::Csv(err)) => match err.kind() {
                csv::ErrorKind::Io(_) => ErrorKind::Storage,
                _ => ErrorKind::MalformedRecord,
            },
            AppError::Config(_) | AppError::Telemetry(_) => ErrorKind::Config,
            AppError::Io(_) => ErrorKind::Storage,
        }
    }

    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            AppError::Pipeline(err) => err.batch_id(),
            _ => None,
        }
    }

    fn status(&self) -> StatusCode {
        if matches!(self, AppError::Config(_) | AppError::Telemetry(_)) {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        match self.kind() {
            ErrorKind::DuplicateBatch | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
            ErrorKind::UnknownBatch | ErrorKind::UnknownSource => StatusCode::NOT_FOUND,
            ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::MalformedRecord | ErrorKind::Config => StatusCode::BAD_REQUEST,
            ErrorKind::LoadInvariantViolation | ErrorKind::Storage => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Pipeline(err) => write!(f, "{}", err),
            AppError::Extraction(err) => write!(f, "extraction error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Pipeline(err) => Some(err),
            AppError::Extraction(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let batch_id = self.batch_id().map(|id| id.to_string());

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind().label(),
            "batch_id": batch_id,
        }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<GateError> for AppError {
    fn from(value: GateError) -> Self {
        Self::Pipeline(PipelineError::Gate(value))
    }
}

impl From<BatchStoreError> for AppError {
    fn from(value: BatchStoreError) -> Self {
        Self::Pipeline(PipelineError::Gate(GateError::Store(value)))
    }
}

impl From<LoadError> for AppError {
    fn from(value: LoadError) -> Self {
        Self::Pipeline(PipelineError::Load(value))
    }
}

impl From<CsvAdapterError> for AppError {
    fn from(value: CsvAdapterError) -> Self {
        Self::Extraction(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BatchArea;

    #[test]
    fn maps_pipeline_errors_to_status_codes() {
        let duplicate = AppError::from(GateError::DuplicateBatch {
            batch_id: BatchId("creb_20250601T090000.000000Z".to_string()),
            area: BatchArea::Loaded,
        });
        let unavailable = AppError::from(LoadError::StoreUnavailable {
            detail: "database is locked".to_string(),
        });
        let unknown = AppError::from(GateError::UnknownBatch(BatchId("missing".to_string())));

        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
        assert_eq!(duplicate.kind(), ErrorKind::DuplicateBatch);
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unreadable_exports_are_storage_errors_not_bad_input() {
        let adapter = crate::adapters::CsvExportAdapter::new("creb");
        let dir = tempfile::tempdir().unwrap();
        let missing = adapter
            .extract_path(&dir.path().join("absent.csv"), chrono::Utc::now())
            .map_err(AppError::from)
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Storage);
        assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let malformed = adapter
            .extract(&b"a,b\n\xff\xfe,1\n"[..], chrono::Utc::now())
            .map_err(AppError::from)
            .unwrap_err();
        assert_eq!(malformed.kind(), ErrorKind::MalformedRecord);
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }
}
