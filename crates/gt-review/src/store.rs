//! Record storage.
//!
//! A store hands out whole record trees and takes them back as wholesale
//! replacements; records are the unit of atomic persistence.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0:?} not found")]
    NotFound(String),
    #[error("invalid record id {record:?}: {reason}")]
    InvalidId { record: String, reason: &'static str },
    #[error("record {record:?}: {source}")]
    Io {
        record: String,
        #[source]
        source: io::Error,
    },
    #[error("record {record:?} is not valid JSON: {source}")]
    Corrupt {
        record: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("record store directory {path:?} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Persistent record storage collaborator.
pub trait RecordStore {
    /// Load a record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no record exists under `id`.
    fn get(&self, id: &str) -> Result<Value, StoreError>;

    /// Durably overwrite a record.
    fn put(&mut self, id: &str, record: &Value) -> Result<(), StoreError>;

    /// Whether a record exists under `id`.
    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All record IDs.
    fn ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Check that `id` can name a record.
///
/// IDs become file stems, so they are limited to `[A-Za-z0-9_.!-]`, must not
/// be empty, and must not be `.` or `..`.
pub fn validate_record_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("record id is empty");
    }
    if id == "." || id == ".." {
        return Err("record id is a relative directory name");
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'!' | b'-'))
    {
        return Err("record id contains characters outside [A-Za-z0-9_.!-]");
    }
    Ok(())
}

// ── In-memory ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: IndexMap<String, Value>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, record: Value) {
        self.records.insert(id.into(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for MemoryRecordStore {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &str) -> Result<Value, StoreError> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn put(&mut self, id: &str, record: &Value) -> Result<(), StoreError> {
        self.records.insert(id.to_string(), record.clone());
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.keys().cloned().collect())
    }
}

// ── Directory of JSON files ───────────────────────────────────────────────

/// One pretty-printed `<id>.json` file per record.
///
/// Writes go to a hidden temporary file in the same directory which is
/// synced and then renamed over the record, so a reader sees either the old
/// or the new record and never a torn one.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Open an existing directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let meta = fs::metadata(&dir).map_err(|source| StoreError::Unavailable {
            path: dir.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(StoreError::Unavailable {
                path: dir,
                source: io::Error::new(io::ErrorKind::Other, "not a directory"),
            });
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding record `id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] if `id` could name a file outside the store.
    pub fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_record_id(id).map_err(|reason| StoreError::InvalidId {
            record: id.to_string(),
            reason,
        })?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn io_err(id: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io { record: id.to_string(), source }
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, id: &str) -> Result<Value, StoreError> {
        let path = self.record_path(id)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(Self::io_err(id)(e)),
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            record: id.to_string(),
            source,
        })
    }

    fn put(&mut self, id: &str, record: &Value) -> Result<(), StoreError> {
        let target = self.record_path(id)?;
        let text = serde_json::to_string_pretty(record).map_err(|source| StoreError::Corrupt {
            record: id.to_string(),
            source,
        })?;
        let tmp = self.dir.join(format!(".{id}.json.tmp"));
        write_then_rename(&tmp, &target, text.as_bytes()).map_err(Self::io_err(id))
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.record_path(id)?.is_file())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Unavailable {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Unavailable {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_record_id(stem).is_ok() && !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Write `bytes` to `tmp`, flush it to disk, then atomically move it to `target`.
pub(crate) fn write_then_rename(tmp: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let result = (|| {
        let mut file = File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(tmp, target)
    })();
    if result.is_err() {
        // The temporary file is ours; the original error is what matters.
        let _ = fs::remove_file(tmp);
    }
    result
}
