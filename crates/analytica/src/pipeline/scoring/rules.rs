use std::collections::BTreeSet;

use super::config::SourceExpectations;
use super::{ScoreComponent, ScoreFactor};
use crate::pipeline::normalizer::NormalizedBatch;

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Valid rows over all rows, counting rows the normalizer rejected.
pub(crate) fn completeness(
    batch: &NormalizedBatch,
    expectations: &SourceExpectations,
    findings: &mut Vec<String>,
) -> ScoreComponent {
    let total = batch.total_rows;
    let valid = batch
        .records
        .iter()
        .filter(|record| {
            expectations
                .required_fields
                .iter()
                .all(|field| record.fields.contains_key(field))
        })
        .count();

    for field in &expectations.required_fields {
        let missing = batch
            .records
            .iter()
            .filter(|record| !record.fields.contains_key(field))
            .count();
        if missing > 0 {
            findings.push(format!(
                "{:.0}% of rows missing field {field}",
                percent(missing, total)
            ));
        }
    }

    let ratio = valid as f64 / total as f64;
    ScoreComponent {
        factor: ScoreFactor::Completeness,
        ratio,
        notes: format!("{valid} of {total} rows complete"),
    }
}

/// `min(actual, expected) / max(actual, expected)` against the batch hint or
/// the configured window.
pub(crate) fn row_count(
    batch: &NormalizedBatch,
    expectations: &SourceExpectations,
    findings: &mut Vec<String>,
) -> ScoreComponent {
    let actual = batch.total_rows;
    let expected = match (batch.expected_row_count, expectations.expected_rows) {
        (Some(hint), _) => Some(hint),
        (None, Some(range)) => Some(range.nearest(actual)),
        (None, None) => None,
    };

    let Some(expected) = expected else {
        return ScoreComponent {
            factor: ScoreFactor::RowCount,
            ratio: 1.0,
            notes: format!("{actual} rows, no expectation configured"),
        };
    };

    let ratio = if actual == expected {
        1.0
    } else {
        actual.min(expected) as f64 / actual.max(expected) as f64
    };

    if actual < expected {
        findings.push(format!(
            "row count {:.0}% below expected ({actual} of {expected})",
            percent(expected - actual, expected)
        ));
    } else if actual > expected {
        findings.push(format!(
            "row count {:.0}% above expected ({actual} vs {expected})",
            percent(actual - expected, expected.max(1))
        ));
    }

    ScoreComponent {
        factor: ScoreFactor::RowCount,
        ratio,
        notes: format!("{actual} rows against {expected} expected"),
    }
}

/// Share of bounded numeric values inside their plausibility window.
pub(crate) fn range(
    batch: &NormalizedBatch,
    expectations: &SourceExpectations,
    findings: &mut Vec<String>,
) -> ScoreComponent {
    let mut checked = 0usize;
    let mut outside = 0usize;

    for (field, bounds) in &expectations.bounds {
        let mut field_outside = 0usize;
        for value in batch
            .records
            .iter()
            .filter_map(|record| record.fields.get(field))
            .filter_map(|value| value.as_f64())
        {
            checked += 1;
            if !bounds.contains(value) {
                field_outside += 1;
            }
        }
        if field_outside > 0 {
            findings.push(format!(
                "{field_outside} values of field {field} outside {}",
                bounds.describe()
            ));
        }
        outside += field_outside;
    }

    let ratio = if checked == 0 {
        1.0
    } else {
        1.0 - outside as f64 / checked as f64
    };

    ScoreComponent {
        factor: ScoreFactor::Range,
        ratio,
        notes: format!("{outside} of {checked} bounded values out of range"),
    }
}

/// Observations that do not move the score but matter to a reviewer.
pub(crate) fn advisories(batch: &NormalizedBatch, findings: &mut Vec<String>) {
    if batch.rows_rejected() > 0 {
        findings.push(format!(
            "{} rows rejected during normalization",
            batch.rows_rejected()
        ));
    }

    let mut seen = BTreeSet::new();
    let repeated = batch
        .records
        .iter()
        .filter(|record| !seen.insert(&record.natural_key))
        .count();
    if repeated > 0 {
        findings.push(format!("{repeated} rows repeat an earlier natural key"));
    }

    if batch.suppressed_values > 0 {
        findings.push(format!(
            "{} suppressed values substituted",
            batch.suppressed_values
        ));
    }

    for (field, count) in &batch.invalid_optional_values {
        findings.push(format!("{count} unparseable values of optional field {field} dropped"));
    }
}
