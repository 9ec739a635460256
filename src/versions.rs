//! Persistent document version map.
//!
//! Maps `doc_id` to the content hash it was last indexed with. This is the
//! source of truth for "has this document changed since the last run".
//!
//! The store is one JSON object keyed by `doc_id`:
//!
//! ```json
//! {
//!   "guides_setup.md": {
//!     "version_hash": "9f86d081…",
//!     "last_indexed": "2026-10-18T09:30:00Z",
//!     "file_path": "/kb/guides/setup.md",
//!     "chunk_count": 4
//!   }
//! }
//! ```
//!
//! Every mutation is persisted by writing a temp file in the same directory
//! and renaming it over the canonical file, so readers never observe a
//! partial write. A store that fails to load is replaced by an empty one
//! (forcing a full re-index) instead of aborting the process.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::models::VersionRecord;

#[derive(Debug)]
pub struct VersionStore {
    path: PathBuf,
    records: BTreeMap<String, VersionRecord>,
}

impl VersionStore {
    /// Open the store at `path`. A missing file yields an empty store; an
    /// unreadable or corrupt file is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match Self::load(&path) {
            Ok(records) => records,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "version store unreadable; starting empty (full re-index)"
                );
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), documents = records.len(), "version store opened");
        Self { path, records }
    }

    fn load(path: &Path) -> Result<BTreeMap<String, VersionRecord>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, doc_id: &str) -> Option<&VersionRecord> {
        self.records.get(doc_id)
    }

    pub fn get_version(&self, doc_id: &str) -> Option<&str> {
        self.records.get(doc_id).map(|r| r.version_hash.as_str())
    }

    /// `true` iff `doc_id` is unseen or was indexed with a different hash.
    pub fn has_changed(&self, doc_id: &str, hash: &str) -> bool {
        self.get_version(doc_id) != Some(hash)
    }

    pub fn update(
        &mut self,
        doc_id: &str,
        hash: &str,
        file_path: &Path,
        chunk_count: usize,
    ) -> Result<()> {
        self.records.insert(
            doc_id.to_string(),
            VersionRecord {
                version_hash: hash.to_string(),
                last_indexed: Utc::now(),
                file_path: file_path.display().to_string(),
                chunk_count,
            },
        );
        self.persist()
    }

    /// Forget `doc_id`. Returns whether it was present.
    pub fn remove(&mut self, doc_id: &str) -> Result<bool> {
        let existed = self.records.remove(doc_id).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_chunks(&self) -> usize {
        self.records.values().map(|r| r.chunk_count).sum()
    }

    fn persist(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.records)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> VersionStore {
        VersionStore::open(tmp.path().join("state").join("versions.json"))
    }

    #[test]
    fn test_has_changed_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp);
        assert!(store.has_changed("a.md", "h1"));
        store.update("a.md", "h1", Path::new("/kb/a.md"), 3).unwrap();
        assert!(!store.has_changed("a.md", "h1"));
        assert!(store.has_changed("a.md", "h2"));
        assert_eq!(store.get_version("a.md"), Some("h1"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = store_in(&tmp);
            store.update("a.md", "h1", Path::new("/kb/a.md"), 3).unwrap();
            store.update("b.md", "h2", Path::new("/kb/b.md"), 1).unwrap();
            store.remove("b.md").unwrap();
        }
        let reopened = store_in(&tmp);
        assert_eq!(reopened.all_ids(), vec!["a.md".to_string()]);
        let record = reopened.get("a.md").unwrap();
        assert_eq!(record.version_hash, "h1");
        assert_eq!(record.chunk_count, 3);
        assert_eq!(record.file_path, "/kb/a.md");
    }

    #[test]
    fn test_on_disk_format_is_keyed_object() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp);
        store.update("a.md", "h1", Path::new("/kb/a.md"), 2).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &json["a.md"];
        assert_eq!(entry["version_hash"], "h1");
        assert_eq!(entry["chunk_count"], 2);
        assert!(entry["last_indexed"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_corrupt_store_degrades_to_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("versions.json");
        std::fs::write(&path, "{ not json").unwrap();
        let mut store = VersionStore::open(&path);
        assert!(store.is_empty());
        store.update("a.md", "h1", Path::new("/kb/a.md"), 1).unwrap();
        assert_eq!(VersionStore::open(&path).len(), 1);
    }

    #[test]
    fn test_clear_and_no_temp_files_left() {
        let tmp = TempDir::new().unwrap();
        let mut store = VersionStore::open(tmp.path().join("versions.json"));
        store.update("a.md", "h1", Path::new("/kb/a.md"), 1).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(VersionStore::open(tmp.path().join("versions.json")).is_empty());
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp);
        assert!(!store.remove("ghost.md").unwrap());
        assert!(!store.path().exists());
    }
}
