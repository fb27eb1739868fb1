//! Locked on-disk persistence for unified documents
//!
//! Documents are read, mutated in memory, and written back wholesale; a
//! save never partially rewrites a file. Concurrent sessions pointing at
//! the same JSON path are serialized by an advisory exclusive lock on a
//! sidecar `.lock` file held for the whole read-modify-write cycle and
//! released on every exit path, including failure. Writes go to a
//! temporary file in the target directory and are renamed into place, so
//! readers never observe a half-written document.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::document::{Document, ParseMode};
use crate::error::{Error, Result};
use crate::time;

/// Handle to one document file and its lock
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

/// Advisory lock on the sidecar file; unlocked on drop
struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path, exclusive: bool) -> Result<LockGuard> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(LockGuard {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release document lock");
        }
    }
}

impl DocumentStore {
    /// Store for a document path; nothing is touched until load/save
    pub fn open(path: impl Into<PathBuf>) -> Self {
        DocumentStore { path: path.into() }
    }

    /// Target document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a document exists at the target path
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and parse the document under a shared lock
    pub fn load(&self, mode: ParseMode) -> Result<Document> {
        let _guard = LockGuard::acquire(&self.lock_path(), false)?;
        self.read_document(mode)
    }

    /// Write the document under an exclusive lock.
    ///
    /// Stamps `created_at` on first save and `updated_at` on every save,
    /// then replaces the file atomically.
    pub fn save(&self, doc: &mut Document) -> Result<()> {
        let _guard = LockGuard::acquire(&self.lock_path(), true)?;
        self.write_document(doc)
    }

    /// Run one read-modify-write cycle under the exclusive lock.
    ///
    /// The closure's mutation is saved only when it returns `Ok`; on error
    /// the on-disk document is left untouched and the lock is released.
    pub fn modify<T, F>(&self, mode: ParseMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let _guard = LockGuard::acquire(&self.lock_path(), true)?;
        let mut doc = self.read_document(mode)?;
        let out = f(&mut doc)?;
        self.write_document(&mut doc)?;
        Ok(out)
    }

    fn lock_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    fn read_document(&self, mode: ParseMode) -> Result<Document> {
        if !self.path.exists() {
            return Err(Error::NotFound(format!(
                "document file {}",
                self.path.display()
            )));
        }
        let raw = fs::read_to_string(&self.path)?;
        Document::parse_str(&raw, mode)
    }

    fn write_document(&self, doc: &mut Document) -> Result<()> {
        let now = time::now();
        if doc.created_at.is_none() {
            doc.created_at = Some(now);
        }
        doc.updated_at = Some(now);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = doc.to_json_string_pretty()?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), items = doc.items.len(), "document saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(".tmp");
        PathBuf::from(os)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Decision, Item, LabelDecision, TaskType, Verification};
    use crate::ledger;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> DocumentStore {
        DocumentStore::open(dir.path().join("labels.json"))
    }

    fn labels_doc() -> Document {
        let mut doc = Document::new(TaskType::Classification);
        doc.add_item(Item::new("file1"));
        doc
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut doc = labels_doc();
        store.save(&mut doc).unwrap();

        let loaded = store.load(ParseMode::Strict).unwrap();
        assert_eq!(loaded, doc);
        assert!(loaded.created_at.is_some());
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_created_at_stamped_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut doc = labels_doc();
        store.save(&mut doc).unwrap();
        let created = doc.created_at.unwrap();

        store.save(&mut doc).unwrap();
        assert_eq!(doc.created_at.unwrap(), created);
        assert!(doc.updated_at.unwrap() >= created);
    }

    #[test]
    fn test_load_missing_file_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.load(ParseMode::Strict).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(dir.path().join("nested/deep/labels.json"));
        store.save(&mut labels_doc()).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&mut labels_doc()).unwrap();
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_modify_appends_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&mut labels_doc()).unwrap();

        store
            .modify(ParseMode::Strict, |doc| {
                let item = doc
                    .item_mut("file1")
                    .ok_or_else(|| Error::NotFound("item file1".to_string()))?;
                let round = Verification::new(
                    crate::time::now(),
                    "reviewer@onc.ca",
                    ledger::next_round(item),
                    vec![LabelDecision::new(
                        "Anthropophony > Vessel",
                        Decision::Added,
                        None,
                    )],
                );
                ledger::append_round(item, round)
            })
            .unwrap();

        let loaded = store.load(ParseMode::Strict).unwrap();
        assert_eq!(loaded.items[0].verifications.len(), 1);
    }

    #[test]
    fn test_modify_failure_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&mut labels_doc()).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        let result: Result<()> = store.modify(ParseMode::Strict, |doc| {
            doc.items.clear(); // would be saved if the closure succeeded
            Err(Error::Config("simulated failure".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);

        // Lock released on the failure path: the next cycle proceeds
        store
            .modify(ParseMode::Strict, |_doc| Ok(()))
            .unwrap();
    }
}
