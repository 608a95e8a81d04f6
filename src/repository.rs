//! Repository facade
//!
//! [`Repository`] bundles the operations callers need (backup, listing,
//! restore, verification and store statistics) behind one handle bound to
//! a repository root. It holds no state beyond the path; every call reads
//! the disk afresh, and the engine assumes a single writer per repository.

use crate::backup;
use crate::config::{BackupConfig, BackupOptions};
use crate::error::Result;
use crate::manifest;
use crate::restore;
use crate::snapshot;
use crate::storage::{ContentStore, StoreStats};
use crate::types::{BackupReport, Manifest, RestoreResult, VerifyReport};
use crate::verification;
use std::path::{Path, PathBuf};

/// Handle to a backup repository
///
/// # Examples
///
/// ```rust,no_run
/// use snapstore::{BackupOptions, Repository};
///
/// # fn main() -> snapstore::Result<()> {
/// let repo = Repository::new("/backups/repo");
/// let report = repo.backup(&BackupOptions::new(vec!["/data/docs".into()]))?;
/// println!("created {}", report.snapshot_id);
///
/// let check = repo.verify("latest")?;
/// assert_eq!(check.missing, 0);
///
/// repo.restore_file("latest", "docs/a.txt", "/tmp/restore".as_ref())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Refer to the repository at `root`; nothing is created until a backup
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository named by a configuration
    pub fn from_config(config: &BackupConfig) -> Self {
        Self::new(config.repository.clone())
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new snapshot
    pub fn backup(&self, options: &BackupOptions) -> Result<BackupReport> {
        backup::backup(&self.root, options)
    }

    /// Snapshot identifiers, oldest first
    pub fn list_snapshots(&self) -> Result<Vec<String>> {
        snapshot::list(&self.root)
    }

    /// Manifest of a snapshot (`latest` allowed)
    pub fn manifest(&self, snapshot_id: &str) -> Result<Manifest> {
        let snapshot = snapshot::resolve(&self.root, snapshot_id)?;
        manifest::load(&snapshot)
    }

    /// Restore a whole snapshot into `target`
    pub fn restore_snapshot(&self, snapshot_id: &str, target: &Path) -> Result<RestoreResult> {
        restore::restore_snapshot(&self.root, snapshot_id, target)
    }

    /// Restore one file of a snapshot into `target`
    pub fn restore_file(&self, snapshot_id: &str, relative_path: &str, target: &Path) -> Result<RestoreResult> {
        restore::restore_file(&self.root, snapshot_id, relative_path, target)
    }

    /// Check that every blob a snapshot references is present
    pub fn verify(&self, snapshot_id: &str) -> Result<VerifyReport> {
        verification::verify(&self.root, snapshot_id)
    }

    /// Presence check plus re-hashing of every referenced blob
    pub fn verify_contents(&self, snapshot_id: &str) -> Result<VerifyReport> {
        verification::verify_contents(&self.root, snapshot_id)
    }

    /// Blob count and size of the content store
    pub fn stats(&self) -> Result<StoreStats> {
        ContentStore::open_existing(&self.root).stats()
    }
}
