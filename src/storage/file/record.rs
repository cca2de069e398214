//! Lock record files guarded by exclusive file locks.
//!
//! Each lock name maps to one JSON file. Reading the current record, deciding,
//! and writing the new one all happen while holding an exclusive `flock` on
//! that file, so processes on the same host see the decision as one atomic
//! unit. File locks may not work correctly on all network filesystems.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::domain::LockRecord;
use crate::error::{StorageError, StorageResult};

/// One lock record on disk.
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    /// Record file for `name` inside `locks_dir`.
    pub fn new(locks_dir: &Path, name: &str) -> Self {
        Self {
            path: locks_dir.join(format!("{}.json", encode_name(name))),
        }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record under a shared lock.
    pub fn read(&self) -> StorageResult<Option<LockRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        file.lock_shared()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;
        let record = read_record(&file);
        file.unlock()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;

        record
    }

    /// Read, decide and write while holding the exclusive lock.
    ///
    /// `decide` receives the current record and returns the record to persist
    /// (or `None` to leave the file untouched) together with the result.
    pub fn transact<T, F>(&self, decide: F) -> StorageResult<T>
    where
        F: FnOnce(Option<LockRecord>) -> (Option<LockRecord>, T),
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        file.lock_exclusive()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;

        let result = read_record(&file).and_then(|current| {
            let (next, result) = decide(current);
            if let Some(next) = next {
                write_record(&mut file, &next)?;
            }
            Ok(result)
        });

        file.unlock()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;

        result
    }
}

fn read_record(mut file: &File) -> StorageResult<Option<LockRecord>> {
    file.seek(SeekFrom::Start(0))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;

    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_record(file: &mut File, record: &LockRecord) -> StorageResult<()> {
    let json = serde_json::to_string_pretty(record)?;

    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;

    Ok(())
}

/// Encode a lock name as a file stem.
///
/// Alphanumerics and `-` are kept; every other byte becomes `_xx` (hex), so
/// distinct names never share a file.
fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}
