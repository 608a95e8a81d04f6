//! Restore engine
//!
//! Restores read a snapshot's materialized `files/` tree and never write to
//! the repository. Destination files are replaced rather than written
//! through, so a target that happens to hold hard links into the store can
//! never modify a blob. Modification times are carried over from the
//! snapshot.

use crate::error::{Result, SnapstoreError};
use crate::snapshot;
use crate::types::RestoreResult;
use crate::utils;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Copy a whole snapshot into `target`, keeping its relative layout
///
/// `snapshot_id` may be `latest`.
///
/// # Errors
///
/// - [`SnapstoreError::NoSnapshots`] / [`SnapstoreError::SnapshotNotFound`] if the snapshot cannot be resolved
/// - [`SnapstoreError::Io`] if the target cannot be written
#[instrument]
pub fn restore_snapshot(repository: &Path, snapshot_id: &str, target: &Path) -> Result<RestoreResult> {
    let start = Instant::now();
    let snapshot = snapshot::resolve(repository, snapshot_id)?;
    let files_dir = snapshot.files_dir();
    info!("Restoring snapshot {} into {:?}", snapshot.id(), target);

    fs::create_dir_all(target)?;
    let mut result = RestoreResult {
        snapshot_id: snapshot.id().to_string(),
        ..Default::default()
    };

    if !files_dir.is_dir() {
        debug!("Snapshot {} has no files directory", snapshot.id());
        return Ok(result);
    }

    for entry in WalkDir::new(&files_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = utils::make_relative(entry.path(), &files_dir)?;
        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        result.bytes_written += replace_with_copy(entry.path(), &destination)?;
        result.files_restored += 1;
        result.restored_paths.push(destination);
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Restored {} files ({}) from {} in {}ms",
        result.files_restored,
        utils::format_bytes(result.bytes_written),
        result.snapshot_id,
        result.duration_ms
    );
    Ok(result)
}

/// Copy one file of a snapshot into `target`, named by its base name
///
/// `relative_path` is relative to the snapshot's `files/` root, for example
/// `docs/sub/a.txt`; either separator is accepted.
///
/// # Errors
///
/// - [`SnapstoreError::FileNotFoundInSnapshot`] if the path is absent, is not
///   a regular file, or would leave the snapshot
/// - [`SnapstoreError::NoSnapshots`] / [`SnapstoreError::SnapshotNotFound`] if the snapshot cannot be resolved
#[instrument]
pub fn restore_file(
    repository: &Path,
    snapshot_id: &str,
    relative_path: &str,
    target: &Path,
) -> Result<RestoreResult> {
    let start = Instant::now();
    let snapshot = snapshot::resolve(repository, snapshot_id)?;
    let not_found = || SnapstoreError::FileNotFoundInSnapshot {
        snapshot: snapshot.id().to_string(),
        path: relative_path.to_string(),
    };

    let relative = utils::safe_relative_path(relative_path).ok_or_else(not_found)?;
    let source = snapshot.files_dir().join(&relative);
    match fs::symlink_metadata(&source) {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Err(not_found()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    }
    let name = source.file_name().ok_or_else(not_found)?;

    fs::create_dir_all(target)?;
    let destination: PathBuf = target.join(name);
    let bytes = replace_with_copy(&source, &destination)?;

    info!("Restored {} from {} to {:?}", relative_path, snapshot.id(), destination);
    Ok(RestoreResult {
        snapshot_id: snapshot.id().to_string(),
        files_restored: 1,
        bytes_written: bytes,
        restored_paths: vec![destination],
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn replace_with_copy(source: &Path, destination: &Path) -> Result<u64> {
    match fs::remove_file(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    utils::copy_with_times(source, destination)
}
