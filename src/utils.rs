//! Utility functions for snapstore
//!
//! Hashing helpers, path manipulation and small file-system helpers shared
//! by the content store, the orchestrator and the restore engine.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{hash_file_content, logical_path};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = hash_file_content(Path::new("example.txt"))?;
//! assert_eq!(hash.len(), 64);
//!
//! let logical = logical_path("docs", Path::new("sub/a.txt"));
//! assert_eq!(logical, "docs/sub/a.txt");
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SnapstoreError};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;

/// Size of the read buffer used while hashing file content
pub const HASH_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Hash a file's content using SHA-256
///
/// The file is streamed through a fixed 4 MiB buffer so memory use stays
/// bounded regardless of file size.
///
/// # Errors
///
/// - [`SnapstoreError::Io`] if the file cannot be opened or read
pub fn hash_file_content(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    hash_reader(file)
}

/// Hash everything a reader yields using SHA-256
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-256
///
/// Returns the digest as a 64-character lowercase hexadecimal string.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Build the snapshot-relative logical path `<root_name>/<relative>`
///
/// Components are always joined with `/`, whatever the host separator.
pub fn logical_path(root_name: &str, relative: &Path) -> String {
    let mut logical = String::from(root_name);
    for component in relative.components() {
        if let Component::Normal(part) = component {
            logical.push('/');
            logical.push_str(&part.to_string_lossy());
        }
    }
    logical
}

/// Base name of a source root, used as the first logical path component
pub fn root_name(root: &Path) -> Result<String> {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SnapstoreError::config(format!("Source {:?} has no base name", root)))
}

/// Resolve a source root to an absolute path without `.` or `..` components
///
/// Resolution is lexical: symlinks are left in place, so `link/..` means the
/// directory holding `link`.
pub fn resolve_source(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    Ok(resolved)
}

/// Convert a forward-slash logical path into a relative host path
///
/// Returns `None` if the path is absolute or tries to leave its root
/// through `..` components.
pub fn safe_relative_path(logical: &str) -> Option<PathBuf> {
    if logical.starts_with(['/', '\\']) {
        return None;
    }
    let mut out = PathBuf::new();
    for part in logical.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            p if p.len() == 2 && p.ends_with(':') => return None,
            p => out.push(p),
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Make `path` relative to `base`
///
/// A lexical strip is tried first so symlinked paths keep their spelling;
/// canonicalisation is the fallback.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| SnapstoreError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Modification time of a file as whole seconds since the Unix epoch
pub fn modified_secs(metadata: &fs::Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).ok(),
        Err(e) => i64::try_from(e.duration().as_secs()).ok().map(|s| -s),
    }
}

/// Format a byte count for humans ("1.50 KiB")
pub fn format_bytes(bytes: u64) -> String {
    const SUFFIXES: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut suffix = 0;
    while value >= 1024.0 && suffix + 1 < SUFFIXES.len() {
        value /= 1024.0;
        suffix += 1;
    }
    format!("{:.2} {}", value, SUFFIXES[suffix])
}

/// Write a file atomically through a temp file in the same directory
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| SnapstoreError::internal(format!("{:?} has no parent directory", path)))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| SnapstoreError::Io(e.error))?;
    trace!("Atomically wrote {:?} ({} bytes)", path, content.len());
    Ok(())
}

/// Copy a file and carry its access and modification times over
pub fn copy_with_times(src: &Path, dst: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dst)?;
    let metadata = fs::metadata(src)?;
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dst, atime, mtime)?;
    Ok(bytes)
}
