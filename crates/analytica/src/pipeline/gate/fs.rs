use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::store::{BatchArea, BatchStore, BatchStoreError};
use crate::pipeline::domain::{BatchId, RawBatch, ValidationDecision};
use crate::pipeline::scoring::ScoreReport;

const BATCH_FILE: &str = "batch.json";
const REPORT_FILE: &str = "report.json";
const DECISION_FILE: &str = "decision.json";
const STAGING_DIR: &str = ".staging";

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Directory-per-batch store: `<root>/<area>/<batch_id>/batch.json`.
///
/// A batch changes area by renaming its directory, so it is never visible
/// in two areas at once. Hidden entries (leading `.`) are ignored.
#[derive(Debug, Clone)]
pub struct FsBatchStore {
    root: PathBuf,
}

impl FsBatchStore {
    /// Open the store, creating the area directories when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BatchStoreError> {
        let root = root.into();
        for area in BatchArea::ALL {
            let dir = root.join(area.dir_name());
            fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        }
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(|source| io_error(&staging, source))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids that could escape their area directory never name a batch.
    fn batch_dir(&self, area: BatchArea, id: &BatchId) -> Result<PathBuf, BatchStoreError> {
        if !id.is_well_formed() {
            return Err(BatchStoreError::NotFound {
                id: id.clone(),
                area,
            });
        }
        Ok(self.root.join(area.dir_name()).join(id.as_str()))
    }

    fn staging_dir(&self, id: &BatchId) -> PathBuf {
        let sequence = STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(STAGING_DIR)
            .join(format!("{id}.{}.{sequence}", std::process::id()))
    }
}

impl BatchStore for FsBatchStore {
    fn create_pending(&self, batch: &RawBatch) -> Result<BatchId, BatchStoreError> {
        let id = batch.id();
        let target = self.batch_dir(BatchArea::Pending, &id)?;
        let staging = self.staging_dir(&id);
        fs::create_dir_all(&staging).map_err(|source| io_error(&staging, source))?;

        let staged = write_json_atomic(&staging.join(BATCH_FILE), batch).and_then(|()| {
            if target.exists() {
                return Err(BatchStoreError::AlreadyExists(id.clone()));
            }
            fs::rename(&staging, &target).map_err(|source| {
                if target.exists() {
                    BatchStoreError::AlreadyExists(id.clone())
                } else {
                    io_error(&target, source)
                }
            })
        });

        if staged.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        staged.map(|()| id)
    }

    fn locate(&self, id: &BatchId) -> Result<Option<BatchArea>, BatchStoreError> {
        Ok(BatchArea::ALL.into_iter().find(|area| {
            self.batch_dir(*area, id)
                .map(|dir| dir.is_dir())
                .unwrap_or(false)
        }))
    }

    fn read_batch(&self, area: BatchArea, id: &BatchId) -> Result<RawBatch, BatchStoreError> {
        read_json(&self.batch_dir(area, id)?.join(BATCH_FILE))?.ok_or_else(|| {
            BatchStoreError::NotFound {
                id: id.clone(),
                area,
            }
        })
    }

    fn list(&self, area: BatchArea) -> Result<Vec<BatchId>, BatchStoreError> {
        let dir = self.root.join(area.dir_name());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&dir, source))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match BatchId::parse(&name) {
                Some(id) => ids.push(id),
                None => tracing::warn!(
                    area = %area,
                    entry = %name,
                    "ignoring unrecognised batch directory"
                ),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn write_report(&self, id: &BatchId, report: &ScoreReport) -> Result<(), BatchStoreError> {
        let dir = self.batch_dir(BatchArea::Pending, id)?;
        if !dir.is_dir() {
            return Err(BatchStoreError::NotFound {
                id: id.clone(),
                area: BatchArea::Pending,
            });
        }
        write_json_atomic(&dir.join(REPORT_FILE), report)
    }

    fn read_report(
        &self,
        area: BatchArea,
        id: &BatchId,
    ) -> Result<Option<ScoreReport>, BatchStoreError> {
        read_json(&self.batch_dir(area, id)?.join(REPORT_FILE))
    }

    fn write_decision(
        &self,
        id: &BatchId,
        decision: &ValidationDecision,
    ) -> Result<(), BatchStoreError> {
        let dir = self.batch_dir(BatchArea::Pending, id)?;
        if !dir.is_dir() {
            return Err(BatchStoreError::NotFound {
                id: id.clone(),
                area: BatchArea::Pending,
            });
        }
        write_json_atomic(&dir.join(DECISION_FILE), decision)
    }

    fn read_decision(
        &self,
        area: BatchArea,
        id: &BatchId,
    ) -> Result<Option<ValidationDecision>, BatchStoreError> {
        read_json(&self.batch_dir(area, id)?.join(DECISION_FILE))
    }

    fn move_batch(
        &self,
        id: &BatchId,
        from: BatchArea,
        to: BatchArea,
    ) -> Result<(), BatchStoreError> {
        let source_dir = self.batch_dir(from, id)?;
        let target_dir = self.batch_dir(to, id)?;
        if !source_dir.is_dir() {
            return Err(BatchStoreError::NotFound {
                id: id.clone(),
                area: from,
            });
        }
        if target_dir.exists() {
            return Err(BatchStoreError::AlreadyExists(id.clone()));
        }
        fs::rename(&source_dir, &target_dir).map_err(|source| io_error(&target_dir, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> BatchStoreError {
    BatchStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write to a sibling temp file, sync, then rename over the target.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BatchStoreError> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let file = File::create(&tmp_path).map_err(|source| io_error(&tmp_path, source))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| BatchStoreError::Format {
        path: tmp_path.clone(),
        source,
    })?;
    writer.flush().map_err(|source| io_error(&tmp_path, source))?;
    let file = writer
        .into_inner()
        .map_err(|err| io_error(&tmp_path, err.into_error()))?;
    file.sync_all().map_err(|source| io_error(&tmp_path, source))?;

    fs::rename(&tmp_path, path).map_err(|source| io_error(path, source))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, BatchStoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io_error(path, source)),
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|source| BatchStoreError::Format {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::domain::{DecidedBy, Decision};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn batch(hour: u32) -> RawBatch {
        let mut row = std::collections::BTreeMap::new();
        row.insert("Property_Type".to_string(), json!("Detached"));
        RawBatch::new(
            "creb",
            Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
            vec![row],
        )
    }

    #[test]
    fn staged_batch_lands_in_pending_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBatchStore::open(dir.path()).unwrap();

        let id = store.create_pending(&batch(9)).unwrap();

        assert_eq!(store.locate(&id).unwrap(), Some(BatchArea::Pending));
        assert_eq!(store.read_batch(BatchArea::Pending, &id).unwrap(), batch(9));
        assert_eq!(store.list(BatchArea::Pending).unwrap(), vec![id]);
    }

    #[test]
    fn staging_the_same_batch_twice_collides() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBatchStore::open(dir.path()).unwrap();
        store.create_pending(&batch(9)).unwrap();

        let error = store.create_pending(&batch(9)).expect_err("collision");

        assert!(matches!(error, BatchStoreError::AlreadyExists(_)));
        let leftovers = fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn list_ignores_hidden_entries_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBatchStore::open(dir.path()).unwrap();
        let second = store.create_pending(&batch(10)).unwrap();
        let first = store.create_pending(&batch(9)).unwrap();
        fs::create_dir(dir.path().join("pending").join(".partial")).unwrap();
        fs::write(dir.path().join("pending").join("notes.txt"), "x").unwrap();

        assert_eq!(store.list(BatchArea::Pending).unwrap(), vec![first, second]);
    }

    #[test]
    fn decision_travels_with_the_moved_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBatchStore::open(dir.path()).unwrap();
        let id = store.create_pending(&batch(9)).unwrap();
        let decision = ValidationDecision {
            batch_id: id.clone(),
            decision: Decision::Rejected,
            reason: Some("benchmark prices look shifted".to_string()),
            decided_by: DecidedBy::Manual,
            decided_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            confidence_score: None,
        };

        store.write_decision(&id, &decision).unwrap();
        store
            .move_batch(&id, BatchArea::Pending, BatchArea::Rejected)
            .unwrap();

        assert_eq!(store.locate(&id).unwrap(), Some(BatchArea::Rejected));
        assert_eq!(
            store.read_decision(BatchArea::Rejected, &id).unwrap(),
            Some(decision)
        );
        assert!(store.list(BatchArea::Pending).unwrap().is_empty());
    }

    #[test]
    fn ids_that_leave_the_area_directory_name_no_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBatchStore::open(dir.path()).unwrap();
        let id = store.create_pending(&batch(9)).unwrap();
        store
            .move_batch(&id, BatchArea::Pending, BatchArea::Rejected)
            .unwrap();
        let escaping = BatchId(format!("../rejected/{id}"));
        let decision = ValidationDecision {
            batch_id: escaping.clone(),
            decision: Decision::Approved,
            reason: None,
            decided_by: DecidedBy::Manual,
            decided_at: Utc::now(),
            confidence_score: None,
        };

        assert_eq!(store.locate(&escaping).unwrap(), None);
        assert!(matches!(
            store.write_decision(&escaping, &decision),
            Err(BatchStoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.read_batch(BatchArea::Pending, &escaping),
            Err(BatchStoreError::NotFound { .. })
        ));
        assert_eq!(store.read_decision(BatchArea::Rejected, &id).unwrap(), None);
    }

    #[test]
    fn moving_a_missing_batch_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBatchStore::open(dir.path()).unwrap();

        let error = store
            .move_batch(&batch(9).id(), BatchArea::Pending, BatchArea::Approved)
            .expect_err("nothing staged");
        assert!(matches!(error, BatchStoreError::NotFound { .. }));
    }
}
