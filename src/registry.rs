//! Path ↔ identity registry with snapshot capture and restore
//!
//! Every path observed by any component gets a stable opaque identity on
//! first sight. The registry also owns the filesystem side of snapshots:
//! reading current content into the store before a trusted write, and
//! writing stored content back over damaged files.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{FileId, Store, TRUST_DB_ID};

/// Outcome of a single-file restore attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// On-disk content rewritten from the stored snapshot
    Restored,
    /// No snapshot was ever captured; the file is left untouched
    NoSnapshot,
    /// The identity has no path mapping anymore
    NoPath,
}

/// Bidirectional path/identity mapping backed by the shared store
pub struct FileRegistry {
    store: Rc<Store>,
}

impl FileRegistry {
    pub fn new(store: Rc<Store>) -> Self {
        Self { store }
    }

    /// Identity for a path, created on first observation
    pub fn identity_for_path(&self, path: &Path) -> Result<FileId> {
        self.store.identity_for_path(path)
    }

    pub fn path_for_identity(&self, id: FileId) -> Result<Option<PathBuf>> {
        self.store.path_for_identity(id)
    }

    /// Identity of the directory containing `path`
    pub fn directory_identity(&self, path: &Path) -> Result<FileId> {
        let dir = path.parent().unwrap_or_else(|| Path::new("/"));
        self.store.identity_for_path(dir)
    }

    /// Whether an identity is the agent's own trust database
    pub fn is_trust_db(&self, id: FileId) -> bool {
        id == TRUST_DB_ID
    }

    /// Capture the file's current content if no snapshot exists yet.
    /// Returns true when a snapshot was taken by this call.
    pub fn snapshot_if_untaken(&self, id: FileId, path: &Path) -> Result<bool> {
        if self.store.snapshot_exists(id)? {
            return Ok(false);
        }
        let content = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        self.store.snapshot_save(id, &content)?;
        debug!("snapshot captured for {:?} ({} bytes)", path, content.len());
        Ok(true)
    }

    /// Rewrite the file's on-disk content from its stored snapshot
    pub fn restore(&self, id: FileId) -> Result<RestoreOutcome> {
        let Some(path) = self.store.path_for_identity(id)? else {
            return Ok(RestoreOutcome::NoPath);
        };
        let Some(content) = self.store.snapshot_load(id)? else {
            return Ok(RestoreOutcome::NoSnapshot);
        };
        std::fs::write(&path, &content).map_err(|e| Error::io(&path, e))?;
        debug!("restored {:?} ({} bytes)", path, content.len());
        Ok(RestoreOutcome::Restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FileRegistry {
        FileRegistry::new(Rc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn test_directory_identity_is_stable() {
        let reg = registry();
        let a = reg.directory_identity(Path::new("/data/f1")).unwrap();
        let b = reg.directory_identity(Path::new("/data/f2")).unwrap();
        let c = reg.directory_identity(Path::new("/other/f3")).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, reg.identity_for_path(Path::new("/data")).unwrap());
    }

    #[test]
    fn test_snapshot_only_taken_once() {
        let reg = registry();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        std::fs::write(&file, b"original").unwrap();
        let id = reg.identity_for_path(&file).unwrap();

        assert!(reg.snapshot_if_untaken(id, &file).unwrap());

        // Later content never overwrites the first capture
        std::fs::write(&file, b"encrypted garbage").unwrap();
        assert!(!reg.snapshot_if_untaken(id, &file).unwrap());

        assert_eq!(reg.restore(id).unwrap(), RestoreOutcome::Restored);
        assert_eq!(std::fs::read(&file).unwrap(), b"original");
    }

    #[test]
    fn test_restore_without_snapshot_leaves_file_alone() {
        let reg = registry();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        std::fs::write(&file, b"current").unwrap();
        let id = reg.identity_for_path(&file).unwrap();

        assert_eq!(reg.restore(id).unwrap(), RestoreOutcome::NoSnapshot);
        assert_eq!(std::fs::read(&file).unwrap(), b"current");
    }

    #[test]
    fn test_restore_unknown_identity() {
        let reg = registry();
        assert_eq!(reg.restore(4242).unwrap(), RestoreOutcome::NoPath);
    }
}
