use std::collections::BTreeMap;

use super::domain::{CanonicalRecord, NaturalKey};

/// Records reduced to one per natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Winners, ordered by natural key.
    pub records: Vec<CanonicalRecord>,
    /// Candidates that lost to a later record for the same key.
    pub superseded: usize,
}

/// Collapse records sharing a natural key. The record with the greatest
/// `(extracted_at, batch_id, row_index)` wins, so the result does not
/// depend on input order.
pub fn merge_records<I>(records: I) -> MergeOutcome
where
    I: IntoIterator<Item = CanonicalRecord>,
{
    let mut winners: BTreeMap<NaturalKey, CanonicalRecord> = BTreeMap::new();
    let mut superseded = 0;

    for candidate in records {
        match winners.get_mut(&candidate.natural_key) {
            Some(current) => {
                superseded += 1;
                if precedence(&candidate) > precedence(current) {
                    *current = candidate;
                }
            }
            None => {
                winners.insert(candidate.natural_key.clone(), candidate);
            }
        }
    }

    MergeOutcome {
        records: winners.into_values().collect(),
        superseded,
    }
}

fn precedence(record: &CanonicalRecord) -> (chrono::DateTime<chrono::Utc>, &str, usize) {
    (record.extracted_at, record.batch_id.as_str(), record.row_index)
}
