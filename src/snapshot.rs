//! Snapshot identifiers and on-disk layout
//!
//! A snapshot lives at `repo/snapshots/<id>/` and owns a `files/` tree plus
//! `manifest.json`. Identifiers are the local start time of the backup at
//! one-second resolution, `YYYY-MM-DD_HH-MM-SS`, fixed width and zero padded
//! so lexicographic order is chronological order.
//!
//! When a snapshot for the same second already exists, a two-digit suffix is
//! appended (`2024-05-01_10-00-00_01`). The suffixed form still sorts after
//! its base and before the next second.

use crate::error::{Result, SnapstoreError};
use chrono::{DateTime, Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding all snapshots of a repository
pub const SNAPSHOTS_DIR: &str = "snapshots";
/// Per-snapshot directory holding the materialized file tree
pub const FILES_DIR: &str = "files";
/// Per-snapshot manifest file name
pub const MANIFEST_FILE: &str = "manifest.json";
/// Directory holding backup event logs
pub const LOGS_DIR: &str = "logs";
/// Keyword resolving to the newest snapshot
pub const LATEST: &str = "latest";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const TIMESTAMP_LEN: usize = 19;
const MAX_COLLISION_SUFFIX: u32 = 99;

/// A snapshot directory inside a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    id: String,
    dir: PathBuf,
}

impl Snapshot {
    /// Refer to snapshot `id` of `repository` without touching the disk
    pub fn at(repository: &Path, id: &str) -> Self {
        Self {
            id: id.to_string(),
            dir: repository.join(SNAPSHOTS_DIR).join(id),
        }
    }

    /// Snapshot identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Root of the materialized file tree
    pub fn files_dir(&self) -> PathBuf {
        self.dir.join(FILES_DIR)
    }

    /// Location of the manifest document
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Whether the snapshot directory exists
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Render a start time as a snapshot identifier
pub fn format_id(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Whether `name` is a well-formed snapshot identifier
pub fn is_snapshot_id(name: &str) -> bool {
    let Some(base) = name.get(..TIMESTAMP_LEN) else {
        return false;
    };
    if NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT).is_err() {
        return false;
    }
    match &name[TIMESTAMP_LEN..] {
        "" => true,
        suffix => {
            suffix.len() == 3
                && suffix.starts_with('_')
                && suffix[1..].bytes().all(|b| b.is_ascii_digit())
        }
    }
}

/// Create the directory of a new snapshot started at `time`
///
/// Creates `snapshots/<id>/files/`. Directory creation doubles as the
/// collision check, so two runs in the same second get distinct identifiers.
///
/// # Errors
///
/// - [`SnapstoreError::SnapshotIdCollision`] if all suffixes for that second are taken
pub fn allocate(repository: &Path, time: &DateTime<Local>) -> Result<Snapshot> {
    let snapshots_root = repository.join(SNAPSHOTS_DIR);
    fs::create_dir_all(&snapshots_root)?;

    let base = format_id(time);
    for suffix in 0..=MAX_COLLISION_SUFFIX {
        let id = if suffix == 0 {
            base.clone()
        } else {
            format!("{}_{:02}", base, suffix)
        };
        let snapshot = Snapshot::at(repository, &id);
        match fs::create_dir(snapshot.dir()) {
            Ok(()) => {
                fs::create_dir_all(snapshot.files_dir())?;
                debug!("Allocated snapshot {}", id);
                return Ok(snapshot);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(SnapstoreError::SnapshotIdCollision(base))
}

/// All snapshot identifiers of a repository, oldest first
///
/// Entries under `snapshots/` that are not directories or do not look like
/// snapshot identifiers are ignored. A repository without a `snapshots/`
/// directory has no snapshots.
pub fn list(repository: &Path) -> Result<Vec<String>> {
    let root = repository.join(SNAPSHOTS_DIR);
    let mut ids = Vec::new();
    if !root.is_dir() {
        return Ok(ids);
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_snapshot_id(&name) {
            ids.push(name);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Resolve an identifier or `latest` to an existing snapshot
///
/// # Errors
///
/// - [`SnapstoreError::NoSnapshots`] if `latest` is asked of an empty repository
/// - [`SnapstoreError::SnapshotNotFound`] if the identifier does not exist
pub fn resolve(repository: &Path, id_or_latest: &str) -> Result<Snapshot> {
    if id_or_latest.eq_ignore_ascii_case(LATEST) {
        let ids = list(repository)?;
        let last = ids.last().ok_or(SnapstoreError::NoSnapshots)?;
        return Ok(Snapshot::at(repository, last));
    }

    if !is_snapshot_id(id_or_latest) {
        return Err(SnapstoreError::SnapshotNotFound(id_or_latest.to_string()));
    }
    let snapshot = Snapshot::at(repository, id_or_latest);
    if !snapshot.exists() {
        return Err(SnapstoreError::SnapshotNotFound(id_or_latest.to_string()));
    }
    Ok(snapshot)
}

/// Location of the event log for a snapshot's backup run
pub fn log_path(repository: &Path, snapshot_id: &str) -> PathBuf {
    repository
        .join(LOGS_DIR)
        .join(format!("backup-{}.jsonl", snapshot_id))
}
