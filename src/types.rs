//! Core data types used throughout the snapstore library
//!
//! ## Overview
//!
//! - **Snapshot state**: [`ManifestEntry`], [`Manifest`] - what a snapshot holds
//! - **Operation results**: [`BackupReport`], [`RestoreResult`], [`VerifyReport`]
//!
//! The manifest document is the stable on-disk format:
//!
//! ```text
//! {"timestamp": "2024-05-01_10-00-00",
//!  "entries": [{"path": "docs/a.txt", "hash": "2cf2...", "size": 5, "mtime": 1714550400}]}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One backed-up file in a snapshot manifest
///
/// # Examples
///
/// ```rust
/// # use snapstore::types::ManifestEntry;
/// let entry = ManifestEntry::new("docs/a.txt", "2cf24dba...", Some(5), Some(1_714_550_400));
/// assert_eq!(entry.path, "docs/a.txt");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Logical path `<sourceRootName>/<relativePath>` with `/` separators
    pub path: String,
    /// SHA-256 of the content; absent only in hand-edited or damaged manifests
    #[serde(default)]
    pub hash: Option<String>,
    /// File size in bytes, absent if stat failed
    #[serde(default)]
    pub size: Option<u64>,
    /// Modification time in whole seconds since the epoch, absent if stat failed
    #[serde(default)]
    pub mtime: Option<i64>,
}

impl ManifestEntry {
    /// Create an entry for stored content
    pub fn new(
        path: impl Into<String>,
        hash: impl Into<String>,
        size: Option<u64>,
        mtime: Option<i64>,
    ) -> Self {
        Self {
            path: path.into(),
            hash: Some(hash.into()),
            size,
            mtime,
        }
    }
}

/// Manifest of a single snapshot
///
/// Entries are kept in the order the scan produced them. A manifest never
/// holds two entries with the same logical path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Identifier of the snapshot this manifest belongs to
    pub timestamp: String,
    /// Backed-up files
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Create an empty manifest for a snapshot
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            entries: Vec::new(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map every logical path to its content hash
    ///
    /// Entries without a hash are left out.
    pub fn entries_by_path(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .filter_map(|e| e.hash.as_ref().map(|h| (e.path.clone(), h.clone())))
            .collect()
    }

    /// Look up an entry by logical path
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Sum of all known entry sizes
    pub fn total_size(&self) -> u64 {
        self.entries.iter().filter_map(|e| e.size).sum()
    }
}

/// Outcome of a backup run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupReport {
    /// Identifier of the new snapshot
    pub snapshot_id: String,
    /// Entries written to the manifest
    pub entry_count: usize,
    /// Files whose content was copied into the store
    pub blobs_copied: usize,
    /// Files whose content was already in the store
    pub blobs_reused: usize,
    /// Files identical to the previous snapshot
    pub files_unchanged: usize,
    /// Files left out by the filter
    pub files_skipped: usize,
    /// Files dropped after exhausting their retries
    pub files_failed: usize,
    /// Source roots that did not exist
    pub sources_missing: Vec<PathBuf>,
    /// Bytes read while hashing
    pub bytes_hashed: u64,
    /// Whether reads went through a shadow copy
    pub used_shadow_copy: bool,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Result of a restore operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Snapshot that was restored from
    pub snapshot_id: String,
    /// Number of files written
    pub files_restored: usize,
    /// Total bytes written
    pub bytes_written: u64,
    /// Paths written, in restore order
    pub restored_paths: Vec<PathBuf>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Result of verifying a snapshot against the content store
///
/// # Examples
///
/// ```rust
/// # use snapstore::types::VerifyReport;
/// let report = VerifyReport { snapshot_id: "s".into(), ok: 3, ..Default::default() };
/// assert!(report.is_valid());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Snapshot that was verified
    pub snapshot_id: String,
    /// Entries whose blob is present (and intact, for deep checks)
    pub ok: usize,
    /// Entries whose blob is absent from the store
    pub missing: usize,
    /// Entries whose blob content no longer hashes to its name (deep checks only)
    pub corrupt: usize,
    /// Entries without a hash, not checked
    pub ignored: usize,
    /// Logical paths of missing entries
    pub missing_paths: Vec<String>,
    /// Logical paths of corrupt entries
    pub corrupt_paths: Vec<String>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl VerifyReport {
    /// Whether every checked entry was fine
    pub fn is_valid(&self) -> bool {
        self.missing == 0 && self.corrupt == 0
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        if self.corrupt > 0 {
            format!(
                "{}: ok={}, missing={}, corrupt={}",
                self.snapshot_id, self.ok, self.missing, self.corrupt
            )
        } else {
            format!("{}: ok={}, missing={}", self.snapshot_id, self.ok, self.missing)
        }
    }
}
