//! Append-only telemetry log
//!
//! Records are stored as rows of a delimited file whose first row is the
//! header of a [`SchemaVersion`]. Appends go through a single writer lock and
//! are synced to disk before returning; reads open their own handle and do
//! not wait for the writer.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::schema::SchemaVersion;
use crate::telemetry::NormalizedRecord;
use crate::{Error, Result};

/// Default file name inside the data directory
pub const DEFAULT_FILE_NAME: &str = "data.csv";

/// Write the header row for `version` if `path` does not exist yet
///
/// An existing file is left untouched and its header is not inspected.
/// Returns whether a header was written.
///
/// # Errors
///
/// Returns error if the file cannot be created or written
pub fn ensure_header(path: &Path, version: SchemaVersion) -> Result<bool> {
    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(version.header())?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;

    tracing::info!(path = %path.display(), schema = %version, "created telemetry log");
    Ok(true)
}

/// Read the header row of an existing log
///
/// # Errors
///
/// Returns error if the file cannot be opened or parsed
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = reader(path)?;
    Ok(reader.headers()?.iter().map(ToString::to_string).collect())
}

fn reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new().flexible(true).from_reader(file))
}

/// Handle to the telemetry log file
///
/// Cheap to clone; clones share the writer lock.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    version: SchemaVersion,
    writer: Arc<Mutex<()>>,
}

impl EventLog {
    /// Open (creating if needed) the log at `path` for `version`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created, or
    /// [`Error::SchemaMismatch`] if an existing header belongs to another layout
    pub fn open(path: impl Into<PathBuf>, version: SchemaVersion) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        ensure_header(&path, version)?;

        let header = read_header(&path)?;
        if !version.matches_header(&header) {
            tracing::error!(
                path = %path.display(),
                expected = %version,
                found = ?SchemaVersion::detect(&header),
                "telemetry log header does not match schema"
            );
            return Err(Error::SchemaMismatch {
                path: path.display().to_string(),
                expected: version.to_string(),
            });
        }

        Ok(Self {
            path,
            version,
            writer: Arc::new(Mutex::new(())),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Append one record as a row
    ///
    /// Values are written in schema order; columns missing from the record
    /// are written empty.
    ///
    /// # Errors
    ///
    /// Returns error if the row cannot be written or synced
    pub fn append(&self, record: &NormalizedRecord) -> Result<()> {
        let row: Vec<&str> = self
            .version
            .header()
            .into_iter()
            .map(|column| record.get(column).unwrap_or_default())
            .collect();

        // Poisoning only means another append panicked; the file is still usable
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Recreate the header if the file was removed while running
        ensure_header(&self.path, self.version)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&row)?;
        writer.flush()?;
        let mut file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.flush()?;
        file.sync_data()?;

        tracing::debug!(path = %self.path.display(), kind = ?record.kind(), "appended telemetry row");
        Ok(())
    }

    /// Read every record in file order
    ///
    /// Records are keyed by the header actually present in the file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn read_all(&self) -> Result<Vec<NormalizedRecord>> {
        let mut reader = reader(&self.path)?;
        let header: Vec<String> = reader.headers()?.iter().map(ToString::to_string).collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            records.push(NormalizedRecord::from_pairs(
                header
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.as_str(), row.get(i).unwrap_or_default())),
            ));
        }
        Ok(records)
    }

    /// Read the last `n` records
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn tail(&self, n: usize) -> Result<Vec<NormalizedRecord>> {
        let mut records = self.read_all()?;
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::telemetry::{TelemetryEvent, normalize};

    fn record(payload: serde_json::Value) -> NormalizedRecord {
        normalize(
            &TelemetryEvent::new(payload, "2024-01-01T00:00:00"),
            SchemaVersion::CURRENT,
        )
        .unwrap()
    }

    #[test]
    fn ensure_header_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");

        assert!(ensure_header(&path, SchemaVersion::CURRENT).unwrap());
        assert!(!ensure_header(&path, SchemaVersion::CURRENT).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("Backend_Time,ESP_Time,Event_Type,"));
    }

    #[test]
    fn ensure_header_does_not_inspect_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "something,else\n").unwrap();

        assert!(!ensure_header(&path, SchemaVersion::V2).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "something,else\n");
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("data.csv");

        let log = EventLog::open(&path, SchemaVersion::V1).unwrap();
        assert!(path.exists());
        assert_eq!(log.version(), SchemaVersion::V1);
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn open_rejects_foreign_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        ensure_header(&path, SchemaVersion::V1).unwrap();

        let err = EventLog::open(&path, SchemaVersion::V2).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(err.is_persistence());
    }

    #[test]
    fn append_then_read_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("data.csv"), SchemaVersion::CURRENT).unwrap();

        let first = record(json!({"sensorData": {"pH": 7.1, "waterTemp": 28.4}}));
        let second = record(json!({
            "program": "Fermentation",
            "experimentName": "with, comma",
            "comment": "line \"quoted\"\nsecond line"
        }));

        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records, vec![first, second]);
    }

    #[test]
    fn tail_returns_latest_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("data.csv"), SchemaVersion::CURRENT).unwrap();

        for i in 0..5 {
            log.append(&record(json!({"sensorData": {"pH": i}}))).unwrap();
        }

        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].get("pH"), Some("3"));
        assert_eq!(tail[1].get("pH"), Some("4"));
        assert_eq!(log.tail(50).unwrap().len(), 5);
    }

    #[test]
    fn short_rows_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let log = EventLog::open(&path, SchemaVersion::V1).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "2024-01-01 00:00:00,t0,periodic").unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), SchemaVersion::V1.columns().len());
        assert_eq!(records[0].get("pH"), Some(""));
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("data.csv"), SchemaVersion::CURRENT).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let rec = record(json!({"sensorData": {"pH": i * 100 + j}}));
                        log.append(&rec).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 80);
        for r in &records {
            assert_eq!(r.len(), SchemaVersion::CURRENT.columns().len());
            assert_eq!(r.kind(), Some("periodic"));
        }
    }
}
