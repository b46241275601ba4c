use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::loader::is_identifier;

const BATCH_ID_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// One raw row as produced by a source adapter.
pub type RawRow = BTreeMap<String, serde_json::Value>;

/// Identifier for a staged batch, derived from its source and extraction time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn for_batch(source_name: &str, extracted_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}_{}",
            source_name,
            extracted_at.format(BATCH_ID_TIME_FORMAT)
        ))
    }

    /// Accept an id from outside the pipeline only when it has exactly the
    /// `<source>_<YYYYMMDDTHHMMSS.ffffffZ>` shape `for_batch` produces.
    pub fn parse(raw: &str) -> Option<Self> {
        let (source_name, stamp) = raw.rsplit_once('_')?;
        if !is_identifier(source_name) {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(stamp, BATCH_ID_TIME_FORMAT).ok()?;
        let id = Self::for_batch(source_name, Utc.from_utc_datetime(&naive));
        (id.0 == raw).then_some(id)
    }

    pub fn is_well_formed(&self) -> bool {
        Self::parse(&self.0).is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Source segment of the id; the timestamp suffix never contains `_`.
    pub fn source_name(&self) -> &str {
        self.0.rsplit_once('_').map_or(self.0.as_str(), |(source, _)| source)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of a single extraction run. Never mutated once staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub source_name: String,
    pub extracted_at: DateTime<Utc>,
    pub rows: Vec<RawRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_row_count: Option<usize>,
}

impl RawBatch {
    pub fn new(source_name: impl Into<String>, extracted_at: DateTime<Utc>, rows: Vec<RawRow>) -> Self {
        Self {
            source_name: source_name.into(),
            extracted_at,
            rows,
            expected_row_count: None,
        }
    }

    pub fn with_expected_row_count(mut self, expected: usize) -> Self {
        self.expected_row_count = Some(expected);
        self
    }

    pub fn id(&self) -> BatchId {
        BatchId::for_batch(&self.source_name, self.extracted_at)
    }
}

/// Typed value of a canonical field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            FieldValue::Date(_) | FieldValue::Text(_) => None,
        }
    }

    /// Canonical text used when the value participates in a natural key.
    pub fn key_fragment(&self) -> String {
        match self {
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Float(value) => value.to_string(),
            FieldValue::Date(date) => date.format("%Y-%m-%d").to_string(),
            FieldValue::Text(text) => text.clone(),
        }
    }
}

/// Destination table plus the ordered key column values of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NaturalKey {
    pub table: String,
    pub parts: Vec<(String, String)>,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.table)?;
        for (index, (column, value)) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ValidationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Approved => "approved",
            ValidationStatus::Rejected => "rejected",
        }
    }
}

/// A normalized, typed row ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub natural_key: NaturalKey,
    pub fields: BTreeMap<String, FieldValue>,
    pub confidence_score: f64,
    pub validation_status: ValidationStatus,
    pub batch_id: BatchId,
    pub extracted_at: DateTime<Utc>,
    pub row_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub const fn status(self) -> ValidationStatus {
        match self {
            Decision::Approved => ValidationStatus::Approved,
            Decision::Rejected => ValidationStatus::Rejected,
        }
    }

    pub const fn label(self) -> &'static str {
        self.status().label()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    Auto,
    Manual,
}

/// Immutable record of how a batch left the pending area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub batch_id: BatchId,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub decided_by: DecidedBy,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

impl ValidationDecision {
    pub fn summary(&self) -> String {
        let actor = match self.decided_by {
            DecidedBy::Auto => "auto",
            DecidedBy::Manual => "manual",
        };
        match &self.reason {
            Some(reason) => format!("{} ({actor}): {reason}", self.decision),
            None => format!("{} ({actor})", self.decision),
        }
    }
}

/// Fixed-width UTC rendering so stored timestamps compare lexicographically.
pub fn timestamp_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn batch_ids_sort_in_extraction_order_within_a_source() {
        let earlier = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();

        let first = BatchId::for_batch("creb", earlier);
        let second = BatchId::for_batch("creb", later);

        assert_eq!(first.as_str(), "creb_20250501T090000.000000Z");
        assert!(first < second);
        assert_eq!(BatchId::for_batch("creb_district", earlier).source_name(), "creb_district");
    }

    #[test]
    fn parse_accepts_only_generated_ids() {
        let at = Utc.with_ymd_and_hms(2025, 6, 3, 9, 0, 0).unwrap();
        let id = BatchId::for_batch("creb_district", at);

        assert_eq!(BatchId::parse(id.as_str()), Some(id.clone()));
        assert!(id.is_well_formed());

        for raw in [
            "creb_missing",
            "creb",
            "../rejected/creb_20250603T090000.000000Z",
            "creb/../x_20250603T090000.000000Z",
            "creb\\x_20250603T090000.000000Z",
            "..",
            "creb_20250603T090000Z",
            "creb_20250603T090000.000000Z/..",
            "9creb_20250603T090000.000000Z",
        ] {
            assert_eq!(BatchId::parse(raw), None, "{raw}");
        }
    }

    #[test]
    fn natural_key_display_lists_columns_in_order() {
        let key = NaturalKey {
            table: "housing_city_monthly".to_string(),
            parts: vec![
                ("date".to_string(), "2025-05-01".to_string()),
                ("property_type".to_string(), "Detached".to_string()),
            ],
        };

        assert_eq!(
            key.to_string(),
            "housing_city_monthly(date=2025-05-01, property_type=Detached)"
        );
    }

    #[test]
    fn timestamp_text_is_fixed_width() {
        let value = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(timestamp_text(value), "2025-05-01T09:00:00.000000Z");
    }
}
