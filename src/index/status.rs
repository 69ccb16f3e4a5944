//! Index status and its external persistence.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{FacetreeError, Result};

/// Indexing status of a dimension index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexStatus {
    /// Members are missing or outdated.
    Stale,
    /// Members are indexed and visible.
    Done,
    /// Indexing failed; terminal until the index is invalidated.
    Error,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexStatus::Stale => "STALE",
            IndexStatus::Done => "DONE",
            IndexStatus::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// What is persisted for one dimension index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: IndexStatus,
    pub message: Option<String>,
    /// Fingerprint of the query that produced the members.
    pub signature: Option<String>,
    /// Content hash of the dimension when the record was written.
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(status: IndexStatus, version: String) -> Self {
        Self {
            status,
            message: None,
            signature: None,
            version,
            updated_at: Utc::now(),
        }
    }
}

/// Key-value persistence of index statuses, keyed by axis key.
pub trait StatusStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Result<Option<StatusRecord>>;

    fn put(&self, key: &str, record: StatusRecord) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Status store living only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    entries: RwLock<HashMap<String, StatusRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self, key: &str) -> Result<Option<StatusRecord>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, record: StatusRecord) -> Result<()> {
        self.entries.write().insert(key.to_string(), record);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Status store persisted as a JSON file, rewritten on every change.
#[derive(Debug)]
pub struct FileStatusStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, StatusRecord>>,
}

impl FileStatusStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, StatusRecord>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            FacetreeError::storage(format!(
                "failed to replace status file {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl StatusStore for FileStatusStore {
    fn get(&self, key: &str) -> Result<Option<StatusRecord>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, record: StatusRecord) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), record);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStatusStore::new();
        assert!(store.get("sales/country").unwrap().is_none());
        store
            .put("sales/country", StatusRecord::new(IndexStatus::Done, "v1".into()))
            .unwrap();
        assert_eq!(
            store.get("sales/country").unwrap().unwrap().status,
            IndexStatus::Done
        );
        store.remove("sales/country").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        {
            let store = FileStatusStore::open(&path).unwrap();
            let mut record = StatusRecord::new(IndexStatus::Error, "v1".into());
            record.message = Some("timeout during indexing".into());
            store.put("sales/city", record).unwrap();
        }

        let reopened = FileStatusStore::open(&path).unwrap();
        let record = reopened.get("sales/city").unwrap().unwrap();
        assert_eq!(record.status, IndexStatus::Error);
        assert_eq!(record.message.as_deref(), Some("timeout during indexing"));
    }
}
