//! Error types for the snapstore library
//!
//! This module defines all error types that can occur during backup, restore
//! and verification. Per-file failures during a backup run are recovered
//! locally by the orchestrator; only configuration errors and
//! snapshot-resolution errors reach the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the snapstore library
pub type Result<T> = std::result::Result<T, SnapstoreError>;

/// Main error type for all snapstore operations
#[derive(Debug, Error)]
pub enum SnapstoreError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A configured source root does not exist at scan time
    #[error("Source missing: {0:?}")]
    SourceMissing(PathBuf),

    /// Shadow copies cannot be used for this run
    #[error("Shadow copy unavailable: {0}")]
    ShadowCopyUnavailable(String),

    /// Snapshot not found in the repository
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// The repository holds no snapshot at all
    #[error("Repository has no snapshots")]
    NoSnapshots,

    /// Path is absent from a snapshot or is not a regular file
    #[error("File {path:?} not found in snapshot {snapshot}")]
    FileNotFoundInSnapshot {
        /// Snapshot identifier
        snapshot: String,
        /// Requested path relative to the snapshot's file tree
        path: String,
    },

    /// Snapshot directory exists but carries no manifest
    #[error("Manifest missing for snapshot {0}")]
    ManifestMissing(String),

    /// Object not found in the content store
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// A file kept failing after every retry attempt
    #[error("Giving up on {path:?} after {attempts} attempts")]
    RetryExhausted {
        /// Source path of the file
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
    },

    /// A file changed between hashing and being copied into the store
    #[error("Content of {path:?} changed while it was being stored (expected {expected})")]
    ContentChanged {
        /// Source path of the file
        path: PathBuf,
        /// Digest the caller computed beforehand
        expected: String,
    },

    /// No source roots were configured
    #[error("No source directories configured")]
    NoSources,

    /// Two source roots share the same base name and would collide
    #[error("Source roots {first:?} and {second:?} share the name '{name}'")]
    DuplicateSourceName {
        /// Colliding base name
        name: String,
        /// First source with this name
        first: PathBuf,
        /// Second source with this name
        second: PathBuf,
    },

    /// Pattern mode was neither `include` nor `exclude`
    #[error("Invalid pattern mode '{0}' (expected 'include' or 'exclude')")]
    InvalidPatternMode(String),

    /// Glob pattern parsing error
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Parser message
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Snapshot identifiers for this second are exhausted
    #[error("Snapshot identifier collision: {0}")]
    SnapshotIdCollision(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapstoreError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SnapstoreError::Internal(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        SnapstoreError::InvalidConfiguration(msg.into())
    }

    /// Check if this error is handled per file during a backup run
    ///
    /// Such errors are logged and counted but never abort the run.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            SnapstoreError::Io(_)
                | SnapstoreError::WalkDir(_)
                | SnapstoreError::SourceMissing(_)
                | SnapstoreError::ContentChanged { .. }
                | SnapstoreError::RetryExhausted { .. }
        )
    }

    /// Check if this error was caused by bad configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SnapstoreError::NoSources
                | SnapstoreError::DuplicateSourceName { .. }
                | SnapstoreError::InvalidPatternMode(_)
                | SnapstoreError::InvalidPattern { .. }
                | SnapstoreError::InvalidConfiguration(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SnapstoreError::SnapshotNotFound(id) => {
                format!("Snapshot '{}' not found. Use 'snapstore list' to see available snapshots.", id)
            }
            SnapstoreError::NoSnapshots => {
                "The repository has no snapshots yet. Run 'snapstore backup' first.".to_string()
            }
            SnapstoreError::DuplicateSourceName { name, .. } => {
                format!(
                    "Two sources are both named '{}'. Their files would overwrite each other \
                     in the snapshot; rename or back them up separately.",
                    name
                )
            }
            SnapstoreError::InvalidPatternMode(mode) => {
                format!("Unknown pattern mode '{}'. Use 'include' or 'exclude'.", mode)
            }
            _ => self.to_string(),
        }
    }
}
