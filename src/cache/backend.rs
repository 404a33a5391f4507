//! Storage backends for persisted vintages
//!
//! Each series is persisted as one self-contained JSON document tagged with a
//! format version. The filesystem backend writes through a temporary file that
//! is synced and renamed over the target, so readers only ever observe a
//! complete previous record or a complete new one.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::data::{SeriesId, Vintage};
use crate::error::{CacheError, Result};

/// Subdirectory of the cache directory holding per-series vintage files
const VINTAGES_DIR: &str = "vintages";

/// Extension of persisted series records
const RECORD_EXTENSION: &str = "json";

/// All persisted vintages of one series, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRecord {
    pub series_id: SeriesId,
    pub vintages: Vec<Vintage>,
}

/// On-disk representation, tagged by format version
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "format_version")]
enum PersistedSeries {
    #[serde(rename = "1")]
    V1 {
        series_id: SeriesId,
        vintages: Vec<Vintage>,
    },
}

/// Encodes a record in the current format
pub fn encode_record(record: &SeriesRecord) -> Result<Vec<u8>> {
    let persisted = PersistedSeries::V1 {
        series_id: record.series_id.clone(),
        vintages: record.vintages.clone(),
    };
    Ok(serde_json::to_vec_pretty(&persisted)?)
}

/// Decodes a record, reporting malformed or unknown-version data as corruption
pub fn decode_record(entry: &str, bytes: &[u8]) -> Result<SeriesRecord> {
    let persisted: PersistedSeries =
        serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptStore {
            entry: entry.to_string(),
            reason: e.to_string(),
        })?;

    match persisted {
        PersistedSeries::V1 {
            series_id,
            mut vintages,
        } => {
            vintages.sort_by_key(|v| v.vintage_date);
            if vintages.windows(2).any(|w| w[0].vintage_date == w[1].vintage_date) {
                return Err(CacheError::CorruptStore {
                    entry: entry.to_string(),
                    reason: "duplicate vintage dates".to_string(),
                });
            }
            if vintages.iter().any(|v| v.series_id != series_id) {
                return Err(CacheError::CorruptStore {
                    entry: entry.to_string(),
                    reason: "vintage belongs to another series".to_string(),
                });
            }
            Ok(SeriesRecord {
                series_id,
                vintages,
            })
        }
    }
}

/// Where the vintage store keeps its records
///
/// `save` must be atomic: after it returns the record is durable, and a crash
/// before it returns must leave the previous record intact.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Loads the record of a series; `Ok(None)` when nothing is stored
    fn load(&self, series_id: &SeriesId) -> Result<Option<SeriesRecord>>;

    /// Replaces the record of a series
    fn save(&self, record: &SeriesRecord) -> Result<()>;

    /// Removes the record of a series; removing a missing record is not an error
    fn remove(&self, series_id: &SeriesId) -> Result<()>;

    /// Lists all series with a persisted record
    fn list(&self) -> Result<Vec<SeriesId>>;
}

/// Filesystem backend storing one JSON file per series
#[derive(Debug, Clone)]
pub struct FsBackend {
    /// Directory where series records are stored
    root: PathBuf,
}

impl FsBackend {
    /// Creates a backend rooted at `<cache_dir>/vintages`
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join(VINTAGES_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, series_id: &SeriesId) -> PathBuf {
        self.root
            .join(format!("{}.{}", escape_file_name(series_id.as_str()), RECORD_EXTENSION))
    }
}

impl StorageBackend for FsBackend {
    fn load(&self, series_id: &SeriesId) -> Result<Option<SeriesRecord>> {
        let path = self.record_path(series_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_record(&path.display().to_string(), &bytes).map(Some)
    }

    fn save(&self, record: &SeriesRecord) -> Result<()> {
        let bytes = encode_record(record)?;
        write_atomic(&self.record_path(&record.series_id), &bytes)
    }

    fn remove(&self, series_id: &SeriesId) -> Result<()> {
        match fs::remove_file(self.record_path(series_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<SeriesId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(id) = unescape_file_name(stem).and_then(|s| SeriesId::new(s).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory backend holding encoded records
///
/// Records go through the same encoding as the filesystem backend, so a
/// store rebuilt on the same backend sees exactly what was persisted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<SeriesId, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes for a series, bypassing encoding
    pub fn insert_raw(&self, series_id: SeriesId, bytes: Vec<u8>) {
        self.lock().insert(series_id, bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SeriesId, Vec<u8>>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, series_id: &SeriesId) -> Result<Option<SeriesRecord>> {
        let records = self.lock();
        match records.get(series_id) {
            Some(bytes) => decode_record(series_id.as_str(), bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, record: &SeriesRecord) -> Result<()> {
        let bytes = encode_record(record)?;
        self.lock().insert(record.series_id.clone(), bytes);
        Ok(())
    }

    fn remove(&self, series_id: &SeriesId) -> Result<()> {
        self.lock().remove(series_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<SeriesId>> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Writes `bytes` to `path` via a synced temporary file and a rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CacheError::Config(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CacheError::Config(format!("invalid file name {}", path.display())))?;
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        // Persist the rename itself; not supported on every platform
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(CacheError::from)
}

/// Escapes a series id into a portable file name
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`.
fn escape_file_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_file_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
