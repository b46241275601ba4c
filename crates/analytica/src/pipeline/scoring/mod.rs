mod config;
mod rules;

pub use config::{NumericBounds, RowCountRange, ScoreWeights, SourceExpectations};

use serde::{Deserialize, Serialize};

use super::domain::BatchId;
use super::normalizer::NormalizedBatch;

/// Deterministic batch scorer; holds only the weighting policy.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    weights: ScoreWeights,
}

impl ConfidenceScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, batch: &NormalizedBatch, expectations: &SourceExpectations) -> ScoreReport {
        let mut findings = Vec::new();

        if batch.total_rows == 0 {
            findings.push("batch contains no rows".to_string());
            return ScoreReport {
                batch_id: batch.batch_id.clone(),
                score: 0.0,
                total_rows: 0,
                valid_rows: 0,
                rows_rejected: 0,
                components: Vec::new(),
                findings,
            };
        }

        let components = vec![
            rules::completeness(batch, expectations, &mut findings),
            rules::row_count(batch, expectations, &mut findings),
            rules::range(batch, expectations, &mut findings),
        ];
        rules::advisories(batch, &mut findings);

        let total_weight = self.weights.total();
        let score = if total_weight > 0.0 {
            components
                .iter()
                .map(|component| component.ratio * self.weight_of(component.factor))
                .sum::<f64>()
                / total_weight
        } else {
            0.0
        };

        let valid_rows = batch
            .records
            .iter()
            .filter(|record| {
                expectations
                    .required_fields
                    .iter()
                    .all(|field| record.fields.contains_key(field))
            })
            .count();

        ScoreReport {
            batch_id: batch.batch_id.clone(),
            score: score.clamp(0.0, 1.0),
            total_rows: batch.total_rows,
            valid_rows,
            rows_rejected: batch.rows_rejected(),
            components,
            findings,
        }
    }

    fn weight_of(&self, factor: ScoreFactor) -> f64 {
        match factor {
            ScoreFactor::Completeness => self.weights.completeness,
            ScoreFactor::RowCount => self.weights.row_count,
            ScoreFactor::Range => self.weights.range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    Completeness,
    RowCount,
    Range,
}

/// Discrete contribution to a score, kept for audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub factor: ScoreFactor,
    pub ratio: f64,
    pub notes: String,
}

/// Score plus the specific findings a reviewer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub batch_id: BatchId,
    pub score: f64,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub rows_rejected: usize,
    pub components: Vec<ScoreComponent>,
    pub findings: Vec<String>,
}

impl ScoreReport {
    pub fn meets(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}
