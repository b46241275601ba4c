use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Float,
    Date,
    String,
}

impl FieldType {
    pub const fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    pub const fn label(self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Date => "date",
            FieldType::String => "string",
        }
    }
}

/// Declared mapping from one raw column to a canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub column: String,
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub key: bool,
    /// Other raw spellings of the same column seen across exports.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl FieldMapping {
    pub(crate) fn column_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.column.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Privacy placeholder handling, e.g. `<5` published for small counts.
///
/// Matching values in numeric fields are replaced with `substitute`. The
/// substitution is counted in the normalized batch so reviewers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionPolicy {
    pub markers: Vec<String>,
    pub substitute: f64,
}

impl SuppressionPolicy {
    pub(crate) fn matches(&self, raw: &str) -> bool {
        self.markers.iter().any(|marker| marker.trim() == raw)
    }
}

/// Per-source normalization contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub table: String,
    pub fields: Vec<FieldMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression: Option<SuppressionPolicy>,
}

impl SourceMapping {
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|mapping| mapping.key)
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|mapping| mapping.field == name)
    }
}

/// Header cleanup shared by mapping lookups: strips BOM/zero-width marks,
/// collapses whitespace and lowercases, so `Property_Type `, `property_type`
/// and `\u{feff}Property_Type` resolve to the same column.
pub(crate) fn normalize_column(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}
