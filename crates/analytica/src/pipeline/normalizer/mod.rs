//! Raw row → canonical record conversion.
//!
//! Every source adapter hands over untyped rows; the normalizer applies the
//! source's declared mapping, coerces values to their target types, and
//! derives the natural key from the mapping's key fields. Rows that cannot
//! produce a required field are excluded and tallied, never fatal.

mod coerce;
mod mapping;

pub use mapping::{FieldMapping, FieldType, SourceMapping, SuppressionPolicy};

pub(crate) use coerce::substitute;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    BatchId, CanonicalRecord, FieldValue, NaturalKey, RawBatch, RawRow, ValidationStatus,
};
use coerce::Coerced;
use mapping::normalize_column;

/// A row that could not be turned into a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("malformed record at row {row_index}: {reason}")]
pub struct MalformedRecord {
    pub row_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub reason: String,
}

/// Result of normalizing a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedBatch {
    pub batch_id: BatchId,
    pub source_name: String,
    pub extracted_at: DateTime<Utc>,
    pub expected_row_count: Option<usize>,
    pub total_rows: usize,
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<MalformedRecord>,
    pub suppressed_values: usize,
    /// Optional fields whose raw value could not be coerced, by field.
    pub invalid_optional_values: BTreeMap<String, usize>,
}

impl NormalizedBatch {
    pub fn rows_rejected(&self) -> usize {
        self.rejected.len()
    }

    /// Stamp every record with the batch's score and status.
    pub fn mark(&mut self, confidence_score: f64, status: ValidationStatus) {
        for record in &mut self.records {
            record.confidence_score = confidence_score;
            record.validation_status = status;
        }
    }
}

/// Stateless transform bound to one source's mapping.
pub struct RecordNormalizer<'a> {
    mapping: &'a SourceMapping,
}

struct RowOutcome {
    record: CanonicalRecord,
    suppressed: usize,
    invalid_optional: Vec<String>,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(mapping: &'a SourceMapping) -> Self {
        Self { mapping }
    }

    pub fn normalize_row(
        &self,
        batch: &RawBatch,
        row_index: usize,
        row: &RawRow,
    ) -> Result<CanonicalRecord, MalformedRecord> {
        self.row_outcome(&batch.id(), batch.extracted_at, row_index, row)
            .map(|outcome| outcome.record)
    }

    pub fn normalize_batch(&self, batch: &RawBatch) -> NormalizedBatch {
        let batch_id = batch.id();
        let mut normalized = NormalizedBatch {
            batch_id: batch_id.clone(),
            source_name: batch.source_name.clone(),
            extracted_at: batch.extracted_at,
            expected_row_count: batch.expected_row_count,
            total_rows: batch.rows.len(),
            records: Vec::with_capacity(batch.rows.len()),
            rejected: Vec::new(),
            suppressed_values: 0,
            invalid_optional_values: BTreeMap::new(),
        };

        for (row_index, row) in batch.rows.iter().enumerate() {
            match self.row_outcome(&batch_id, batch.extracted_at, row_index, row) {
                Ok(outcome) => {
                    normalized.suppressed_values += outcome.suppressed;
                    for field in outcome.invalid_optional {
                        *normalized.invalid_optional_values.entry(field).or_default() += 1;
                    }
                    normalized.records.push(outcome.record);
                }
                Err(malformed) => {
                    tracing::debug!(batch_id = %batch_id, %malformed, "row excluded");
                    normalized.rejected.push(malformed);
                }
            }
        }

        normalized
    }

    fn row_outcome(
        &self,
        batch_id: &BatchId,
        extracted_at: DateTime<Utc>,
        row_index: usize,
        row: &RawRow,
    ) -> Result<RowOutcome, MalformedRecord> {
        let columns: HashMap<String, &serde_json::Value> = row
            .iter()
            .map(|(column, value)| (normalize_column(column), value))
            .collect();

        let mut fields = BTreeMap::new();
        let mut suppressed = 0;
        let mut invalid_optional = Vec::new();

        for mapping in &self.mapping.fields {
            let raw = mapping
                .column_names()
                .find_map(|name| columns.get(&normalize_column(name)).copied());

            let coerced = match raw {
                Some(raw) => coerce::coerce(raw, mapping.field_type, self.mapping.suppression.as_ref()),
                None => Ok(Coerced::Absent),
            };

            match coerced {
                Ok(Coerced::Value(value)) => {
                    fields.insert(mapping.field.clone(), value);
                }
                Ok(Coerced::Suppressed(value)) => {
                    suppressed += 1;
                    fields.insert(mapping.field.clone(), value);
                }
                Ok(Coerced::Absent) if mapping.required => {
                    return Err(MalformedRecord {
                        row_index,
                        field: Some(mapping.field.clone()),
                        reason: format!("required field '{}' is missing", mapping.field),
                    });
                }
                Ok(Coerced::Absent) => {}
                Err(reason) if mapping.required => {
                    return Err(MalformedRecord {
                        row_index,
                        field: Some(mapping.field.clone()),
                        reason: format!("field '{}': {reason}", mapping.field),
                    });
                }
                Err(_) => invalid_optional.push(mapping.field.clone()),
            }
        }

        let natural_key = self.natural_key(&fields, row_index)?;

        Ok(RowOutcome {
            record: CanonicalRecord {
                natural_key,
                fields,
                confidence_score: 0.0,
                validation_status: ValidationStatus::Pending,
                batch_id: batch_id.clone(),
                extracted_at,
                row_index,
            },
            suppressed,
            invalid_optional,
        })
    }

    fn natural_key(
        &self,
        fields: &BTreeMap<String, FieldValue>,
        row_index: usize,
    ) -> Result<NaturalKey, MalformedRecord> {
        let mut parts = Vec::new();
        for mapping in self.mapping.key_fields() {
            let value = fields.get(&mapping.field).ok_or_else(|| MalformedRecord {
                row_index,
                field: Some(mapping.field.clone()),
                reason: format!("key field '{}' is missing", mapping.field),
            })?;
            parts.push((mapping.field.clone(), value.key_fragment()));
        }

        Ok(NaturalKey {
            table: self.mapping.table.clone(),
            parts,
        })
    }
}
