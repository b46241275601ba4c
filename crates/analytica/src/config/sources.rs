use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use super::ConfigError;
use crate::pipeline::loader::{is_identifier, TableSchema, METADATA_COLUMNS};
use crate::pipeline::normalizer::{
    substitute, FieldMapping, FieldType, SourceMapping, SuppressionPolicy,
};
use crate::pipeline::scoring::{ScoreWeights, SourceExpectations};

/// Everything the pipeline knows about one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub name: String,
    pub mapping: SourceMapping,
    pub expectations: SourceExpectations,
    pub weights: ScoreWeights,
    /// Overrides the gate's default threshold when set.
    pub auto_approve_threshold: Option<f64>,
}

/// Validated set of source profiles, keyed by source name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRegistry {
    profiles: BTreeMap<String, SourceProfile>,
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    weights: Option<ScoreWeights>,
    sources: BTreeMap<String, SourceEntry>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    table: String,
    fields: Vec<FieldMapping>,
    #[serde(default)]
    suppression: Option<SuppressionPolicy>,
    #[serde(default)]
    expectations: SourceExpectations,
    #[serde(default)]
    weights: Option<ScoreWeights>,
    #[serde(default)]
    auto_approve_threshold: Option<f64>,
}

impl SourceRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::SourcesIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|err| match err {
            ParseFailure::Format(source) => ConfigError::SourcesFormat {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Invalid(err) => err,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw).map_err(|err| match err {
            ParseFailure::Format(source) => ConfigError::SourcesFormat {
                path: "<inline>".into(),
                source,
            },
            ParseFailure::Invalid(err) => err,
        })
    }

    pub fn from_profiles(profiles: Vec<SourceProfile>) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for profile in profiles {
            let profile = validate(profile)?;
            registry.profiles.insert(profile.name.clone(), profile);
        }
        registry.table_schemas_checked()?;
        Ok(registry)
    }

    pub fn profile(&self, source_name: &str) -> Option<&SourceProfile> {
        self.profiles.get(source_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// One schema per destination table, ordered by table name.
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();
        for profile in self.profiles.values() {
            tables
                .entry(profile.mapping.table.clone())
                .or_insert_with(|| TableSchema::from_mapping(&profile.mapping));
        }
        tables.into_values().collect()
    }

    fn parse(raw: &str) -> Result<Self, ParseFailure> {
        let file: SourcesFile = serde_json::from_str(raw).map_err(ParseFailure::Format)?;
        let default_weights = file.weights.unwrap_or_default();

        let profiles = file
            .sources
            .into_iter()
            .map(|(name, entry)| SourceProfile {
                name,
                mapping: SourceMapping {
                    table: entry.table,
                    fields: entry.fields,
                    suppression: entry.suppression,
                },
                expectations: entry.expectations,
                weights: entry.weights.unwrap_or(default_weights),
                auto_approve_threshold: entry.auto_approve_threshold,
            })
            .collect();

        Self::from_profiles(profiles).map_err(ParseFailure::Invalid)
    }

    /// Sources writing to the same table must agree on its shape.
    fn table_schemas_checked(&self) -> Result<(), ConfigError> {
        let mut seen: BTreeMap<String, (String, TableSchema)> = BTreeMap::new();
        for profile in self.profiles.values() {
            let schema = TableSchema::from_mapping(&profile.mapping);
            match seen.get(&schema.name) {
                Some((owner, existing)) if *existing != schema => {
                    return Err(invalid(
                        &profile.name,
                        format!(
                            "table '{}' is declared differently by source '{owner}'",
                            schema.name
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    seen.insert(schema.name.clone(), (profile.name.clone(), schema));
                }
            }
        }
        Ok(())
    }
}

enum ParseFailure {
    Format(serde_json::Error),
    Invalid(ConfigError),
}

fn invalid(source_name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSource {
        source_name: source_name.to_string(),
        reason: reason.into(),
    }
}

fn validate(mut profile: SourceProfile) -> Result<SourceProfile, ConfigError> {
    let name = profile.name.clone();
    if !is_identifier(&name) {
        return Err(invalid(&name, "source names may only use letters, digits and '_'"));
    }

    let mapping = &profile.mapping;
    if !is_identifier(&mapping.table) {
        return Err(invalid(&name, format!("'{}' is not a valid table name", mapping.table)));
    }

    let mut fields = BTreeSet::new();
    for field in &mapping.fields {
        if !is_identifier(&field.field) {
            return Err(invalid(&name, format!("'{}' is not a valid field name", field.field)));
        }
        if METADATA_COLUMNS.contains(&field.field.as_str()) {
            return Err(invalid(&name, format!("field '{}' is a reserved column", field.field)));
        }
        if !fields.insert(field.field.as_str()) {
            return Err(invalid(&name, format!("field '{}' is mapped twice", field.field)));
        }
        if field.key && !field.required {
            return Err(invalid(&name, format!("key field '{}' must be required", field.field)));
        }
    }
    if mapping.key_fields().next().is_none() {
        return Err(invalid(&name, "at least one field must be part of the natural key"));
    }

    if let Some(policy) = &mapping.suppression {
        if !policy.substitute.is_finite() {
            return Err(invalid(&name, "suppression substitute must be a finite number"));
        }
        if policy.markers.iter().all(|marker| marker.trim().is_empty()) {
            return Err(invalid(&name, "suppression needs at least one non-empty marker"));
        }
        for field in mapping.fields.iter().filter(|field| field.field_type.is_numeric()) {
            substitute(policy.substitute, field.field_type)
                .map_err(|reason| invalid(&name, format!("field '{}': {reason}", field.field)))?;
        }
    }

    let expectations = &profile.expectations;
    for field in &expectations.required_fields {
        if mapping.field(field).is_none() {
            return Err(invalid(&name, format!("required field '{field}' is not mapped")));
        }
    }
    for (field, bounds) in &expectations.bounds {
        match mapping.field(field) {
            Some(mapped) if mapped.field_type.is_numeric() => {}
            Some(mapped) => {
                return Err(invalid(
                    &name,
                    format!("bounds on {} field '{field}'", mapped.field_type.label()),
                ))
            }
            None => return Err(invalid(&name, format!("bounded field '{field}' is not mapped"))),
        }
        if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
            if min > max {
                return Err(invalid(&name, format!("bounds on '{field}' are inverted")));
            }
        }
    }
    if let Some(range) = expectations.expected_rows {
        if range.min > range.max {
            return Err(invalid(&name, "expected_rows.min exceeds expected_rows.max"));
        }
    }

    if !profile.weights.is_valid() {
        return Err(invalid(&name, "score weights must be non-negative with a positive sum"));
    }
    if let Some(threshold) = profile.auto_approve_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(&name, format!("auto_approve_threshold {threshold} is outside [0, 1]")));
        }
    }

    if profile.expectations.required_fields.is_empty() {
        profile.expectations.required_fields = profile
            .mapping
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.field.clone())
            .collect();
    }

    Ok(profile)
}
