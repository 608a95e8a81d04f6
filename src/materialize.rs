//! Projection of stored blobs into a snapshot's browsable file tree
//!
//! A blob is hard-linked to `snapshots/<id>/files/<logical path>`, so every
//! snapshot looks like a plain copy of the sources while sharing storage with
//! the blob store. Where hard links are not possible (cross-device store,
//! filesystems without link support, permission limits) the blob is copied
//! byte for byte instead, keeping its timestamps. A failed copy surfaces as
//! an ordinary I/O error for the retry policy to handle.

use crate::error::Result;
use crate::utils;
use std::fs;
use std::io;
use std::path::Path;
use tracing::trace;

/// How a blob ended up at its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// Destination is a hard link to the blob
    Linked,
    /// Destination is an independent copy of the blob
    Copied,
}

/// Place `blob` at `destination`, linking if possible and copying otherwise
///
/// Parent directories are created and an existing destination is replaced.
pub fn materialize(blob: &Path, destination: &Path) -> Result<Materialized> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::remove_file(destination) {
        Ok(()) => trace!("Replaced existing {:?}", destination),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    match fs::hard_link(blob, destination) {
        Ok(()) => {
            trace!("Linked {:?} -> {:?}", destination, blob);
            Ok(Materialized::Linked)
        }
        Err(e) => {
            trace!("Hard link to {:?} failed ({}), copying", destination, e);
            utils::copy_with_times(blob, destination)?;
            Ok(Materialized::Copied)
        }
    }
}
