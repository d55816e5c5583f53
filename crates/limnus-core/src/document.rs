//! Crash-safe JSON document persistence.
//!
//! Every document is read and written whole. Each read-modify-write cycle
//! holds an advisory lock on a sidecar `<file>.lock` for its full duration,
//! and writes land through a temp file in the same directory that is fsynced
//! and renamed over the target, so no reader ever sees a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error};

use crate::error::{LimnusError, Result};

/// What loading does with a document that exists but cannot be read or parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Move the file aside as `<file>.corrupt-<timestamp>` and start empty.
    #[default]
    Quarantine,
    /// Start empty and leave the file to be overwritten by the next write.
    Reset,
    /// Refuse to continue.
    Fail,
}

/// A JSON document of type `T` stored at a single path.
#[derive(Debug, Clone)]
pub struct JsonDocument<T> {
    path: PathBuf,
    policy: CorruptPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>, policy: CorruptPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> CorruptPolicy {
        self.policy
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the document under a shared lock. A missing file yields `T::default()`.
    pub fn load(&self) -> Result<T> {
        let lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.read()?;
        self.read_unlocked()
    }

    /// Replace the document under the exclusive lock.
    pub fn store(&self, value: &T) -> Result<()> {
        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.write()?;
        self.write_unlocked(value)
    }

    /// Run one locked read-modify-write cycle.
    ///
    /// The closure receives the freshly loaded document and returns whether it
    /// changed it; the document is only rewritten when it did. Returns the
    /// document as it stands after the cycle.
    pub fn update<F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<bool>,
    {
        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.write()?;
        let mut document = self.read_unlocked()?;
        if mutate(&mut document)? {
            self.write_unlocked(&document)?;
        }
        Ok(document)
    }

    fn read_unlocked(&self) -> Result<T> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return self.recover(e.to_string()),
        };
        match serde_json::from_str(&content) {
            Ok(document) => Ok(document),
            Err(e) => self.recover(e.to_string()),
        }
    }

    fn recover(&self, reason: String) -> Result<T> {
        match self.policy {
            CorruptPolicy::Fail => Err(LimnusError::CorruptDocument {
                path: self.path.clone(),
                reason,
            }),
            CorruptPolicy::Reset => {
                error!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Unreadable document discarded, continuing with empty state"
                );
                Ok(T::default())
            }
            CorruptPolicy::Quarantine => {
                let target = self.quarantine_path();
                // Readers share the lock, so another one may have moved the
                // file aside between our read and this rename.
                if let Err(e) = fs::rename(&self.path, &target) {
                    if e.kind() == ErrorKind::NotFound {
                        debug!(path = %self.path.display(), "Document already quarantined");
                        return Ok(T::default());
                    }
                    return Err(e.into());
                }
                error!(
                    path = %self.path.display(),
                    quarantined = %target.display(),
                    reason = %reason,
                    "Unreadable document quarantined, continuing with empty state"
                );
                Ok(T::default())
            }
        }
    }

    fn write_unlocked(&self, value: &T) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), "Document written");
        Ok(())
    }

    fn open_lock_file(&self) -> Result<File> {
        fs::create_dir_all(self.parent_dir())?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.sidecar("lock"))?;
        Ok(file)
    }

    fn quarantine_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        self.sidecar(&format!("corrupt-{}", stamp))
    }

    fn sidecar(&self, suffix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.path.with_file_name(format!("{}.{}", name, suffix))
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(dir: &Path, policy: CorruptPolicy) -> JsonDocument<Vec<String>> {
        JsonDocument::new(dir.join("items.json"), policy)
    }

    fn quarantined_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupt-"))
            .collect()
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Fail);
        assert!(!document.exists());
        assert!(document.load().unwrap().is_empty());
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Fail);
        document
            .store(&vec!["alpha".to_string(), "beta".to_string()])
            .unwrap();
        assert_eq!(document.load().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let document: JsonDocument<Vec<String>> =
            JsonDocument::new(dir.path().join("a").join("b").join("x.json"), CorruptPolicy::Fail);
        document.store(&vec!["x".to_string()]).unwrap();
        assert!(document.exists());
    }

    #[test]
    fn test_update_writes_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Fail);

        let untouched = document.update(|_| Ok(false)).unwrap();
        assert!(untouched.is_empty());
        assert!(!document.exists());

        let after = document
            .update(|items| {
                items.push("gamma".to_string());
                Ok(true)
            })
            .unwrap();
        assert_eq!(after, vec!["gamma"]);
        assert_eq!(document.load().unwrap(), vec!["gamma"]);
    }

    #[test]
    fn test_update_error_leaves_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Fail);
        document.store(&vec!["keep".to_string()]).unwrap();

        let result = document.update(|items| {
            items.clear();
            Err(LimnusError::Ledger("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(document.load().unwrap(), vec!["keep"]);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Fail);
        document.store(&vec!["one".to_string()]).unwrap();
        document.store(&vec!["two".to_string()]).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["items.json", "items.json.lock"]);
    }

    #[test]
    fn test_corrupt_document_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Quarantine);
        fs::write(document.path(), "{ not json").unwrap();

        assert!(document.load().unwrap().is_empty());
        assert!(!document.exists());

        let moved = quarantined_files(dir.path());
        assert_eq!(moved.len(), 1);
        assert_eq!(fs::read_to_string(&moved[0]).unwrap(), "{ not json");
    }

    #[test]
    fn test_concurrent_loads_of_corrupt_document_all_succeed() {
        use std::sync::Barrier;

        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Quarantine);

        for _ in 0..50 {
            fs::write(document.path(), "{ not json").unwrap();
            let barrier = Barrier::new(8);
            std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            document.load()
                        })
                    })
                    .collect();
                for handle in handles {
                    assert!(handle.join().unwrap().unwrap().is_empty());
                }
            });
            assert!(!document.exists());
        }
        assert!(!quarantined_files(dir.path()).is_empty());
    }

    #[test]
    fn test_corrupt_document_reset_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Reset);
        fs::write(document.path(), "[1, 2").unwrap();

        assert!(document.load().unwrap().is_empty());
        assert!(document.exists());
        assert!(quarantined_files(dir.path()).is_empty());
    }

    #[test]
    fn test_corrupt_document_fail() {
        let dir = tempfile::tempdir().unwrap();
        let document = doc(dir.path(), CorruptPolicy::Fail);
        fs::write(document.path(), "garbage").unwrap();

        let err = document.load().unwrap_err();
        assert!(matches!(err, LimnusError::CorruptDocument { .. }));
        assert_eq!(fs::read_to_string(document.path()).unwrap(), "garbage");
    }

    #[test]
    fn test_corrupt_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&CorruptPolicy::Quarantine).unwrap(),
            "\"quarantine\""
        );
        let policy: CorruptPolicy = serde_json::from_str("\"reset\"").unwrap();
        assert_eq!(policy, CorruptPolicy::Reset);
    }
}
