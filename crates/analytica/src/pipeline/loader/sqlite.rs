use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, Transaction};

use super::{LoadError, LoadSummary, RecordStore, TableLoad, TableSchema};
use crate::pipeline::domain::{timestamp_text, CanonicalRecord, FieldValue};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite destination. Each operation opens its own connection so the store
/// can be shared across threads without holding a handle open.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, LoadError> {
        let conn = Connection::open(&self.path).map_err(classify)?;
        conn.busy_timeout(self.busy_timeout).map_err(classify)?;
        Ok(conn)
    }

    fn connect_read_only(&self) -> Result<Connection, LoadError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(classify)?;
        conn.busy_timeout(self.busy_timeout).map_err(classify)?;
        Ok(conn)
    }
}

impl RecordStore for SqliteStore {
    fn ensure_schema(&self, tables: &[TableSchema]) -> Result<(), LoadError> {
        let conn = self.connect()?;
        for table in tables {
            conn.execute_batch(&table.create_sql()).map_err(classify)?;
        }
        Ok(())
    }

    fn upsert(
        &self,
        tables: &[TableSchema],
        records: &[CanonicalRecord],
    ) -> Result<LoadSummary, LoadError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(classify)?;

        let mut summary = LoadSummary::default();
        for table in tables {
            tx.execute_batch(&table.create_sql()).map_err(classify)?;

            let batch: Vec<&CanonicalRecord> = records
                .iter()
                .filter(|record| record.natural_key.table == table.name)
                .collect();
            if batch.is_empty() {
                continue;
            }

            let outcome = upsert_table(&tx, table, &batch)?;
            summary.tables.insert(table.name.clone(), outcome);
        }

        tx.commit().map_err(classify)?;
        Ok(summary)
    }

    /// Read-only: tables that were never created count as empty and no
    /// database file is created.
    fn table_counts(&self, tables: &[TableSchema]) -> Result<BTreeMap<String, u64>, LoadError> {
        let mut counts: BTreeMap<String, u64> =
            tables.iter().map(|table| (table.name.clone(), 0)).collect();
        if !self.path.exists() {
            return Ok(counts);
        }

        let conn = self.connect_read_only()?;
        for table in tables {
            if table_exists(&conn, &table.name)? {
                counts.insert(table.name.clone(), row_count(&conn, table)?);
            }
        }
        Ok(counts)
    }
}

fn upsert_table(
    tx: &Transaction<'_>,
    table: &TableSchema,
    records: &[&CanonicalRecord],
) -> Result<TableLoad, LoadError> {
    let before = row_count(tx, table)?;
    let mut changes = 0usize;

    {
        let mut stmt = tx.prepare(&table.upsert_sql()).map_err(classify)?;
        for record in records {
            changes += stmt
                .execute(params_from_iter(row_values(table, record)))
                .map_err(|err| match classify(err) {
                    LoadError::InvariantViolation { detail, .. } => LoadError::InvariantViolation {
                        key: Some(record.natural_key.clone()),
                        detail: format!("{}: {detail}", record.natural_key),
                    },
                    other => other,
                })?;
        }
    }

    let after = row_count(tx, table)?;
    let inserted = after.saturating_sub(before) as usize;
    let updated = changes.saturating_sub(inserted);

    Ok(TableLoad {
        inserted,
        updated,
        unchanged: records.len().saturating_sub(changes),
    })
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, LoadError> {
    let found: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .map_err(classify)?;
    Ok(found > 0)
}

fn row_count(conn: &Connection, table: &TableSchema) -> Result<u64, LoadError> {
    let count: i64 = conn
        .query_row(&table.count_sql(), [], |row| row.get(0))
        .map_err(classify)?;
    Ok(count.max(0) as u64)
}

fn row_values(table: &TableSchema, record: &CanonicalRecord) -> Vec<Value> {
    let mut values: Vec<Value> = table
        .columns
        .iter()
        .map(|column| sql_value(record.fields.get(&column.name)))
        .collect();
    values.push(Value::Text(record.batch_id.to_string()));
    values.push(Value::Text(record.batch_id.source_name().to_string()));
    values.push(Value::Text(timestamp_text(record.extracted_at)));
    values.push(Value::Real(record.confidence_score));
    values.push(Value::Text(record.validation_status.label().to_string()));
    values
}

fn sql_value(value: Option<&FieldValue>) -> Value {
    match value {
        None => Value::Null,
        Some(FieldValue::Integer(value)) => Value::Integer(*value),
        Some(FieldValue::Float(value)) => Value::Real(*value),
        Some(FieldValue::Date(date)) => Value::Text(date.format("%Y-%m-%d").to_string()),
        Some(FieldValue::Text(text)) => Value::Text(text.clone()),
    }
}

/// Map SQLite failures onto the load error taxonomy: constraint failures
/// are invariant violations, I/O and locking problems mean the store is
/// unavailable.
fn classify(err: rusqlite::Error) -> LoadError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => LoadError::InvariantViolation {
            key: None,
            detail: err.to_string(),
        },
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::NotADatabase,
        ) => LoadError::StoreUnavailable {
            detail: err.to_string(),
        },
        _ => LoadError::Sqlite(err),
    }
}
