use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::pipeline::domain::{RawBatch, RawRow};

/// Reads a CSV export (header row plus data rows) into a [`RawBatch`].
///
/// Values stay strings; typing is the normalizer's job. Short rows are
/// accepted and the missing cells are simply absent from the raw row.
#[derive(Debug, Clone)]
pub struct CsvExportAdapter {
    source_name: String,
    expected_row_count: Option<usize>,
}

#[derive(Debug)]
pub enum CsvAdapterError {
    Io(std::io::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for CsvAdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CsvAdapterError::Io(err) => write!(f, "failed to read CSV export: {}", err),
            CsvAdapterError::Csv(err) => write!(f, "invalid CSV data: {}", err),
        }
    }
}

impl std::error::Error for CsvAdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CsvAdapterError::Io(err) => Some(err),
            CsvAdapterError::Csv(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for CsvAdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for CsvAdapterError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl CsvExportAdapter {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            expected_row_count: None,
        }
    }

    pub fn with_expected_row_count(mut self, expected: Option<usize>) -> Self {
        self.expected_row_count = expected;
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn extract_path(
        &self,
        path: &Path,
        extracted_at: DateTime<Utc>,
    ) -> Result<RawBatch, CsvAdapterError> {
        let file = File::open(path)?;
        self.extract(file, extracted_at)
    }

    pub fn extract<R: Read>(
        &self,
        reader: R,
        extracted_at: DateTime<Utc>,
    ) -> Result<RawBatch, CsvAdapterError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mut rows = Vec::new();

        for record in csv_reader.records() {
            let record = record?;
            let row: RawRow = headers
                .iter()
                .zip(record.iter())
                .filter(|(header, _)| !header.is_empty())
                .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
                .collect();
            if row.values().all(|value| value.as_str().is_some_and(str::is_empty)) {
                continue;
            }
            rows.push(row);
        }

        tracing::debug!(
            source = %self.source_name,
            rows = rows.len(),
            columns = headers.len(),
            "csv export read"
        );

        let batch = RawBatch::new(self.source_name.clone(), extracted_at, rows);
        Ok(match self.expected_row_count {
            Some(expected) => batch.with_expected_row_count(expected),
            None => batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXPORT: &str = "\u{feff}Date,Property_Type,Benchmark_Price\n\
        2025-05-01, Detached ,\"$785,600\"\n\
        ,,\n\
        2025-05-01,Apartment\n";

    #[test]
    fn extract_keeps_values_as_trimmed_strings() {
        let extracted_at = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        let batch = CsvExportAdapter::new("creb")
            .with_expected_row_count(Some(5))
            .extract(EXPORT.as_bytes(), extracted_at)
            .expect("csv parses");

        assert_eq!(batch.source_name, "creb");
        assert_eq!(batch.expected_row_count, Some(5));
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].get("Property_Type"), Some(&Value::from("Detached")));
        assert_eq!(batch.rows[0].get("Benchmark_Price"), Some(&Value::from("$785,600")));
        assert!(!batch.rows[1].contains_key("Benchmark_Price"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let extracted_at = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        let error = CsvExportAdapter::new("creb")
            .extract_path(Path::new("does/not/exist.csv"), extracted_at)
            .expect_err("missing file");
        assert!(matches!(error, CsvAdapterError::Io(_)));
    }
}
