//! Local CSV staging, one file per stream.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{StagingError, TargetError};
use crate::flatten::FlatRecord;

pub const STAGING_EXTENSION: &str = "csv";

#[derive(Debug)]
struct StagedStream {
    path: PathBuf,
    header: Vec<String>,
    rows: u64,
    dropped_columns: BTreeSet<String>,
}

/// A staged file ready for promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub stream: String,
    pub path: PathBuf,
    pub rows: u64,
}

/// Append-only staging area.
///
/// The set of staged streams is tracked here rather than inferred from the
/// file system, so flush decisions never depend on directory listings.
#[derive(Debug)]
pub struct RecordBuffer {
    root: PathBuf,
    staged: BTreeMap<String, StagedStream>,
}

impl RecordBuffer {
    /// Opens the staging area at `root`, adopting any files an interrupted
    /// run left behind. The directory itself is created on first append.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, TargetError> {
        let mut buffer = Self {
            root: root.into(),
            staged: BTreeMap::new(),
        };
        buffer.adopt_leftovers()?;
        Ok(buffer)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    pub fn staged_files(&self) -> Vec<StagedFile> {
        self.staged
            .iter()
            .map(|(stream, staged)| StagedFile {
                stream: stream.clone(),
                path: staged.path.clone(),
                rows: staged.rows,
            })
            .collect()
    }

    pub fn header(&self, stream: &str) -> Option<&[String]> {
        self.staged.get(stream).map(|s| s.header.as_slice())
    }

    /// Forgets a promoted stream; the next record starts a fresh file.
    pub fn release(&mut self, stream: &str) -> Option<StagedFile> {
        self.staged.remove(stream).map(|staged| StagedFile {
            stream: stream.to_string(),
            path: staged.path,
            rows: staged.rows,
        })
    }

    /// Staging file for `stream`. The stream name is percent-encoded, so
    /// distinct streams never share a file.
    pub fn staging_path(&self, stream: &str) -> PathBuf {
        let file_stem = urlencoding::encode(stream);
        self.root.join(format!("{file_stem}.{STAGING_EXTENSION}"))
    }

    /// Appends one record.
    ///
    /// The first record for a stream since its last promotion fixes the
    /// column order (its own key order) and writes the header row. Cells are
    /// always taken from the unflattened record; `flat` only feeds logging.
    pub fn append(
        &mut self,
        stream: &str,
        flat: &FlatRecord,
        record: &Map<String, Value>,
    ) -> Result<(), TargetError> {
        let path = self.staging_path(stream);
        let staged = match self.staged.entry(stream.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(start_file(&self.root, path, stream, record)?),
        };

        if flat.len() != record.len() {
            debug!(
                stream,
                columns = record.len(),
                flattened_columns = flat.len(),
                "nested fields staged as JSON text"
            );
        }
        for key in record.keys() {
            if !staged.header.contains(key) && staged.dropped_columns.insert(key.clone()) {
                warn!(stream, column = %key, "column not in staged header; dropping it");
            }
        }

        let row: Vec<String> = staged
            .header
            .iter()
            .map(|column| cell(record.get(column)))
            .collect();
        let path = staged.path.clone();
        append_row(&path, &row).map_err(|source| TargetError::Staging { path, source })?;
        staged.rows += 1;
        Ok(())
    }

    fn adopt_leftovers(&mut self) -> Result<(), TargetError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(TargetError::Staging {
                    path: self.root.clone(),
                    source: err.into(),
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|err| TargetError::Staging {
                path: self.root.clone(),
                source: err.into(),
            })?;
            let path = entry.path();
            let is_staged_file = path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(STAGING_EXTENSION);
            if !is_staged_file {
                continue;
            }
            let Some(file_stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let stream = match urlencoding::decode(file_stem) {
                Ok(stream) => stream.into_owned(),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "skipping leftover file with an undecodable name"
                    );
                    continue;
                }
            };

            let (header, rows) = read_existing(&path).map_err(|source| TargetError::Staging {
                path: path.clone(),
                source,
            })?;
            if header.is_empty() {
                warn!(path = %path.display(), "removing empty leftover staging file");
                if let Err(err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %err, "failed to remove leftover file");
                }
                continue;
            }

            info!(stream = %stream, rows, "adopting staged file from a previous run");
            self.staged.insert(
                stream,
                StagedStream {
                    path,
                    header,
                    rows,
                    dropped_columns: BTreeSet::new(),
                },
            );
        }
        Ok(())
    }
}

fn start_file(
    root: &Path,
    path: PathBuf,
    stream: &str,
    record: &Map<String, Value>,
) -> Result<StagedStream, TargetError> {
    let staging = |source: StagingError| TargetError::Staging {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(root).map_err(|e| staging(e.into()))?;
    let header: Vec<String> = record.keys().cloned().collect();

    let file = File::create(&path).map_err(|e| staging(e.into()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&header).map_err(|e| staging(e.into()))?;
    writer.flush().map_err(|e| staging(e.into()))?;

    debug!(stream, path = %path.display(), "started staging file");
    Ok(StagedStream {
        path,
        header,
        rows: 0,
        dropped_columns: BTreeSet::new(),
    })
}

fn append_row(path: &Path, row: &[String]) -> Result<(), StagingError> {
    let file = OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

fn read_existing(path: &Path) -> Result<(Vec<String>, u64), StagingError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = 0u64;
    for row in reader.records() {
        row?;
        rows += 1;
    }
    Ok((header, rows))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::flatten::flatten;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn append(buffer: &mut RecordBuffer, stream: &str, value: Value) {
        let record = obj(value);
        buffer.append(stream, &flatten(&record), &record).unwrap();
    }

    #[test]
    fn header_comes_from_first_record_and_rows_keep_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = RecordBuffer::open(dir.path().join("staging")).unwrap();

        append(&mut buffer, "users", json!({"id": 1, "name": "a"}));
        append(&mut buffer, "users", json!({"name": "b", "id": 2}));

        let text = fs::read_to_string(buffer.staging_path("users")).unwrap();
        assert_eq!(text, "id,name\n1,a\n2,b\n");
        assert_eq!(buffer.staged_files()[0].rows, 2);
    }

    #[test]
    fn cells_render_json_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = RecordBuffer::open(dir.path()).unwrap();

        append(
            &mut buffer,
            "events",
            json!({"ok": true, "n": null, "meta": {"k": 1}, "tags": ["x"], "note": "a,b"}),
        );
        append(&mut buffer, "events", json!({"ok": false}));

        let text = fs::read_to_string(buffer.staging_path("events")).unwrap();
        assert_eq!(
            text,
            "ok,n,meta,tags,note\ntrue,,\"{\"\"k\"\":1}\",\"[\"\"x\"\"]\",\"a,b\"\nfalse,,,,\n"
        );
    }

    #[test]
    fn unknown_columns_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = RecordBuffer::open(dir.path()).unwrap();

        append(&mut buffer, "users", json!({"id": 1}));
        append(&mut buffer, "users", json!({"id": 2, "extra": "x"}));

        let text = fs::read_to_string(buffer.staging_path("users")).unwrap();
        assert_eq!(text, "id\n1\n2\n");
    }

    #[test]
    fn release_starts_a_new_file_with_a_new_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = RecordBuffer::open(dir.path()).unwrap();

        append(&mut buffer, "users", json!({"id": 1}));
        let released = buffer.release("users").unwrap();
        assert_eq!(released.rows, 1);
        assert!(!buffer.has_staged());

        append(&mut buffer, "users", json!({"name": "z", "id": 9}));
        let text = fs::read_to_string(buffer.staging_path("users")).unwrap();
        assert_eq!(text, "name,id\nz,9\n");
    }

    #[test]
    fn leftovers_are_adopted_without_a_second_header() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.csv"), "id,name\n1,a\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut buffer = RecordBuffer::open(dir.path()).unwrap();
        assert_eq!(buffer.staged_count(), 1);
        assert_eq!(buffer.header("users"), Some(&["id".to_string(), "name".to_string()][..]));

        append(&mut buffer, "users", json!({"id": 2, "name": "b"}));
        let text = fs::read_to_string(dir.path().join("users.csv")).unwrap();
        assert_eq!(text, "id,name\n1,a\n2,b\n");
        assert_eq!(buffer.staged_files()[0].rows, 2);
    }

    #[test]
    fn streams_differing_only_by_separator_stage_apart() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = RecordBuffer::open(dir.path()).unwrap();

        append(&mut buffer, "a/b", json!({"id": 1, "name": "first"}));
        append(&mut buffer, "a_b", json!({"sku": "x"}));
        append(&mut buffer, "a/b", json!({"id": 2, "name": "second"}));

        assert_ne!(buffer.staging_path("a/b"), buffer.staging_path("a_b"));
        assert_eq!(
            fs::read_to_string(buffer.staging_path("a/b")).unwrap(),
            "id,name\n1,first\n2,second\n"
        );
        assert_eq!(
            fs::read_to_string(buffer.staging_path("a_b")).unwrap(),
            "sku\nx\n"
        );
        let rows: Vec<(String, u64)> = buffer
            .staged_files()
            .into_iter()
            .map(|staged| (staged.stream, staged.rows))
            .collect();
        assert_eq!(rows, vec![("a/b".to_string(), 2), ("a_b".to_string(), 1)]);
    }

    #[test]
    fn adopted_leftovers_keep_their_encoded_stream_name() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut buffer = RecordBuffer::open(dir.path()).unwrap();
            append(&mut buffer, "sales\\eu/2024", json!({"id": 1}));
        }

        let buffer = RecordBuffer::open(dir.path()).unwrap();
        let staged = buffer.staged_files();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].stream, "sales\\eu/2024");
        assert_eq!(staged[0].rows, 1);
    }

    #[test]
    fn missing_root_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = RecordBuffer::open(dir.path().join("absent")).unwrap();
        assert!(!buffer.has_staged());
        assert!(!buffer.root().exists());
    }
}
