use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Relative weights of the three score factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub completeness: f64,
    pub row_count: f64,
    pub range: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            row_count: 1.0,
            range: 1.0,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.completeness + self.row_count + self.range
    }

    pub fn is_valid(&self) -> bool {
        let parts = [self.completeness, self.row_count, self.range];
        parts.iter().all(|weight| weight.is_finite() && *weight >= 0.0) && self.total() > 0.0
    }
}

/// Inclusive row count window a healthy extraction falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountRange {
    pub min: usize,
    pub max: usize,
}

impl RowCountRange {
    pub fn exactly(count: usize) -> Self {
        Self {
            min: count,
            max: count,
        }
    }

    /// The bound closest to `actual`, or `actual` itself when inside.
    pub fn nearest(&self, actual: usize) -> usize {
        actual.clamp(self.min, self.max)
    }
}

/// Plausibility window for a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NumericBounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl NumericBounds {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    pub fn describe(&self) -> String {
        let render = |bound: Option<f64>, open: &str| bound.map_or(open.to_string(), |v| v.to_string());
        format!("[{}, {}]", render(self.min, "-inf"), render(self.max, "+inf"))
    }
}

/// What a source's batches are expected to look like.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceExpectations {
    #[serde(default)]
    pub expected_rows: Option<RowCountRange>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub bounds: BTreeMap<String, NumericBounds>,
}
