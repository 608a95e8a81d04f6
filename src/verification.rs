//! Snapshot verification
//!
//! Verification checks a snapshot's manifest against the content store. It
//! never repairs anything.
//!
//! Two depths are available:
//!
//! 1. **Presence** ([`SnapshotVerifier::verify`]): every entry's blob must
//!    exist. Blob content is not read, so a blob that was altered in place
//!    still counts as ok.
//! 2. **Contents** ([`SnapshotVerifier::verify_contents`]): every present
//!    blob is re-hashed and compared against its name; mismatches are
//!    reported as corrupt.
//!
//! Entries without a hash are counted as ignored in both modes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use snapstore::verification;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = verification::verify(Path::new("repo"), "latest")?;
//! if report.is_valid() {
//!     println!("{}", report.summary());
//! } else {
//!     for path in &report.missing_paths {
//!         eprintln!("missing: {}", path);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::manifest;
use crate::snapshot::{self, Snapshot};
use crate::storage::ContentStore;
use crate::types::VerifyReport;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Checks snapshots against one content store
#[derive(Debug)]
pub struct SnapshotVerifier<'a> {
    store: &'a ContentStore,
}

impl<'a> SnapshotVerifier<'a> {
    /// Create a verifier for `store`
    pub fn new(store: &'a ContentStore) -> Self {
        Self { store }
    }

    /// Check that every referenced blob is present
    ///
    /// # Errors
    ///
    /// - [`crate::SnapstoreError::ManifestMissing`] if the snapshot has no manifest
    pub fn verify(&self, snapshot: &Snapshot) -> Result<VerifyReport> {
        self.run(snapshot, false)
    }

    /// Check presence and re-hash every present blob
    pub fn verify_contents(&self, snapshot: &Snapshot) -> Result<VerifyReport> {
        self.run(snapshot, true)
    }

    fn run(&self, snapshot: &Snapshot, deep: bool) -> Result<VerifyReport> {
        let start = Instant::now();
        let manifest = manifest::load(snapshot)?;
        let mut report = VerifyReport {
            snapshot_id: snapshot.id().to_string(),
            ..Default::default()
        };

        for entry in &manifest.entries {
            let Some(hash) = entry.hash.as_deref() else {
                report.ignored += 1;
                continue;
            };

            if !self.store.exists(hash) {
                debug!("Blob for {} is missing", entry.path);
                report.missing += 1;
                report.missing_paths.push(entry.path.clone());
                continue;
            }

            if deep {
                let intact = match self.store.verify_blob(hash) {
                    Ok(intact) => intact,
                    Err(e) => {
                        warn!("Could not re-hash blob of {}: {}", entry.path, e);
                        false
                    }
                };
                if !intact {
                    report.corrupt += 1;
                    report.corrupt_paths.push(entry.path.clone());
                    continue;
                }
            }

            report.ok += 1;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }
}

/// Presence check of a snapshot (`latest` allowed)
#[instrument]
pub fn verify(repository: &Path, snapshot_id: &str) -> Result<VerifyReport> {
    let snapshot = snapshot::resolve(repository, snapshot_id)?;
    let store = ContentStore::open_existing(repository);
    let report = SnapshotVerifier::new(&store).verify(&snapshot)?;
    info!("Verified {}", report.summary());
    Ok(report)
}

/// Presence and content check of a snapshot (`latest` allowed)
#[instrument]
pub fn verify_contents(repository: &Path, snapshot_id: &str) -> Result<VerifyReport> {
    let snapshot = snapshot::resolve(repository, snapshot_id)?;
    let store = ContentStore::open_existing(repository);
    let report = SnapshotVerifier::new(&store).verify_contents(&snapshot)?;
    info!("Verified contents of {}", report.summary());
    Ok(report)
}
