//! Manifest persistence
//!
//! One `manifest.json` per snapshot, written once at the end of a backup run
//! and never modified afterwards. Key names (`timestamp`, `entries`, `path`,
//! `hash`, `size`, `mtime`) are stable; manifests written by older versions
//! that lack `size` or `mtime` load with those fields absent.

use crate::error::{Result, SnapstoreError};
use crate::snapshot::{self, Snapshot};
use crate::types::{Manifest, ManifestEntry};
use crate::utils;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Load the manifest of a snapshot
///
/// # Errors
///
/// - [`SnapstoreError::ManifestMissing`] if the snapshot has no manifest
/// - [`SnapstoreError::Json`] if the document cannot be parsed
pub fn load(snapshot: &Snapshot) -> Result<Manifest> {
    let path = snapshot.manifest_path();
    if !path.is_file() {
        return Err(SnapstoreError::ManifestMissing(snapshot.id().to_string()));
    }
    let json = fs::read_to_string(&path)?;
    let manifest: Manifest = serde_json::from_str(&json)?;
    debug!("Loaded manifest {} ({} entries)", snapshot.id(), manifest.len());
    Ok(manifest)
}

/// Load the manifest of the newest snapshot that has one
///
/// Snapshots left without a manifest by an aborted run are passed over. An
/// empty manifest is returned when the repository has no usable snapshot.
pub fn load_previous(repository: &Path) -> Result<Manifest> {
    for id in snapshot::list(repository)?.iter().rev() {
        match load(&Snapshot::at(repository, id)) {
            Ok(manifest) => return Ok(manifest),
            Err(SnapstoreError::ManifestMissing(_)) => {
                debug!("Snapshot {} has no manifest, looking further back", id);
            }
            Err(e) => {
                warn!("Ignoring unreadable manifest of snapshot {}: {}", id, e);
            }
        }
    }
    Ok(Manifest::default())
}

/// Write a manifest into its snapshot directory
pub fn write(snapshot: &Snapshot, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    utils::atomic_write(&snapshot.manifest_path(), json.as_bytes())?;
    debug!("Wrote manifest {} ({} entries)", snapshot.id(), manifest.len());
    Ok(())
}

/// Accumulates entries during a run, keeping logical paths unique
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    manifest: Manifest,
    seen: HashSet<String>,
}

impl ManifestBuilder {
    /// Start a manifest for a snapshot
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            manifest: Manifest::new(timestamp),
            seen: HashSet::new(),
        }
    }

    /// Append an entry; returns false and drops it if the path is already present
    pub fn push(&mut self, entry: ManifestEntry) -> bool {
        if !self.seen.insert(entry.path.clone()) {
            warn!("Duplicate logical path {} left out of the manifest", entry.path);
            return false;
        }
        self.manifest.entries.push(entry);
        true
    }

    /// Entries so far
    pub fn len(&self) -> usize {
        self.manifest.entries.len()
    }

    /// Whether no entries were added
    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    /// Finish and hand out the manifest
    pub fn build(self) -> Manifest {
        self.manifest
    }
}
