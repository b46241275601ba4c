use serde::Serialize;

use crate::pipeline::normalizer::{FieldType, SourceMapping};

/// Columns every destination table carries besides the mapped fields.
pub const METADATA_COLUMNS: [&str; 6] = [
    "id",
    "batch_id",
    "source_name",
    "extracted_at",
    "confidence_score",
    "validation_status",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub field_type: FieldType,
}

/// Destination table derived from a source mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub key_columns: Vec<String>,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn from_mapping(mapping: &SourceMapping) -> Self {
        Self {
            name: mapping.table.clone(),
            key_columns: mapping.key_fields().map(|field| field.field.clone()).collect(),
            columns: mapping
                .fields
                .iter()
                .map(|field| ColumnSpec {
                    name: field.field.clone(),
                    field_type: field.field_type,
                })
                .collect(),
        }
    }

    pub fn create_sql(&self) -> String {
        let mut lines = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        for column in &self.columns {
            let not_null = if self.key_columns.contains(&column.name) {
                " NOT NULL"
            } else {
                ""
            };
            lines.push(format!(
                "\"{}\" {}{not_null}",
                column.name,
                sql_type(column.field_type)
            ));
        }
        lines.push("batch_id TEXT NOT NULL".to_string());
        lines.push("source_name TEXT NOT NULL".to_string());
        lines.push("extracted_at TEXT NOT NULL".to_string());
        lines.push("confidence_score REAL NOT NULL".to_string());
        lines.push("validation_status TEXT NOT NULL".to_string());
        lines.push(format!("UNIQUE({})", quoted(&self.key_columns)));

        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.name,
            lines.join(",\n    ")
        )
    }

    /// Insert-or-overwrite by natural key. Rows are only replaced by data
    /// from a strictly later `(extracted_at, batch_id)`, which makes a
    /// repeated load a no-op and keeps stale batches from winning.
    pub fn upsert_sql(&self) -> String {
        let mut columns: Vec<String> = self.columns.iter().map(|column| column.name.clone()).collect();
        columns.extend(
            ["batch_id", "source_name", "extracted_at", "confidence_score", "validation_status"]
                .iter()
                .map(|name| name.to_string()),
        );

        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");

        let assignments = columns
            .iter()
            .filter(|column| !self.key_columns.contains(column))
            .map(|column| format!("\"{column}\" = excluded.\"{column}\""))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO \"{table}\" ({columns}) VALUES ({placeholders}) \
             ON CONFLICT({keys}) DO UPDATE SET {assignments} \
             WHERE excluded.extracted_at > \"{table}\".extracted_at \
             OR (excluded.extracted_at = \"{table}\".extracted_at \
             AND excluded.batch_id > \"{table}\".batch_id)",
            table = self.name,
            columns = quoted(&columns),
            keys = quoted(&self.key_columns),
        )
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM \"{}\"", self.name)
    }
}

/// SQL identifiers are interpolated, so names are restricted to
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Date | FieldType::String => "TEXT",
    }
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}
