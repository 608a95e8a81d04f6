//! # Snapstore - Incremental, content-addressed directory backups
//!
//! Snapstore captures point-in-time snapshots of one or more directory trees
//! into a repository, storing every distinct file content exactly once.
//!
//! ## Overview
//!
//! Snapstore lets you:
//! - Back up several source directories into timestamped snapshots
//! - Deduplicate identical content across files and across snapshots
//! - Browse each snapshot as a plain directory tree
//! - Restore a whole snapshot or a single file
//! - Verify that every file a snapshot references is still stored
//!
//! ## Repository layout
//!
//! ```text
//! repo/
//! ├── .store/<hh>/<sha256>                 content-addressed blobs
//! ├── snapshots/<timestamp>/files/<source>/...
//! ├── snapshots/<timestamp>/manifest.json
//! └── logs/backup-<timestamp>.jsonl        one event per line
//! ```
//!
//! Snapshot identifiers are the local start time of the run,
//! `YYYY-MM-DD_HH-MM-SS`, so listing them in lexicographic order lists them
//! chronologically.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapstore::{BackupOptions, FilterSpec, PatternMode, Repository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Repository::new("/backups/repo");
//!
//! let options = BackupOptions::new(vec!["/data/docs".into(), "/data/photos".into()])
//!     .filter(FilterSpec::new(["*.tmp", "*.log"], PatternMode::Exclude)?)
//!     .max_retries(3);
//! let report = repo.backup(&options)?;
//! println!("Created {} with {} files", report.snapshot_id, report.entry_count);
//!
//! for id in repo.list_snapshots()? {
//!     println!("{}", id);
//! }
//!
//! let check = repo.verify("latest")?;
//! println!("{}", check.summary());
//!
//! repo.restore_snapshot("latest", "/tmp/restore".as_ref())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Blobs
//!
//! File content is stored under its SHA-256 digest. Storing content that is
//! already present is a no-op reported as a `blob_reuse` event.
//!
//! ### Manifests
//!
//! Each snapshot records `{path, hash, size, mtime}` for every file it
//! contains, where `path` is `<source name>/<relative path>` with `/`
//! separators. Files unchanged since the previous snapshot are recorded too,
//! so every manifest is complete on its own.
//!
//! ### Events
//!
//! Progress is reported through an [`EventSink`] passed in by the caller and
//! mirrored to the run's JSONL log.
//!
//! ### Shadow copies
//!
//! On Windows a run may read through volume shadow copies so files in use
//! are captured consistently. Anywhere the facility is unavailable the run
//! falls back to the live filesystem.
//!
//! ## Error Handling
//!
//! Operations return `Result<T, SnapstoreError>`. Failures reading single
//! files during a backup are retried, logged and counted instead of aborting
//! the run; configuration problems and unresolvable snapshots are returned
//! to the caller.
//!
//! ## Module Organization
//!
//! - [`repository`]: The [`Repository`] facade
//! - [`backup`]: Backup orchestration
//! - [`restore`]: Whole-snapshot and single-file restore
//! - [`verification`]: Presence and content checks
//! - [`storage`]: Content-addressed blob store
//! - [`manifest`] / [`snapshot`]: Snapshot data model and layout
//! - [`config`]: Configuration documents and backup options
//! - [`filter`]: Include/exclude patterns
//! - [`shadow`]: Shadow-copy context
//! - [`retry`]: Per-file retry policy
//! - [`events`]: Event stream and sinks
//! - [`types`]: Common types
//! - [`error`]: Error types

// Public API modules
pub mod backup;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod manifest;
pub mod materialize;
pub mod repository;
pub mod restore;
pub mod retry;
pub mod shadow;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod verification;

// Internal modules
mod utils;

// Re-export main types for convenience
pub use config::{BackupConfig, BackupOptions};
pub use error::{Result, SnapstoreError};
pub use events::{Event, EventRecord, EventSink, FanoutSink, JsonlSink, MemorySink, NullSink, TracingSink};
pub use filter::{FilterSpec, PatternMode};
pub use repository::Repository;
pub use retry::RetryPolicy;
pub use shadow::{ShadowCopyContext, ShadowProvider, ShadowState};
pub use storage::{ContentStore, StoreStats};
pub use types::*;
pub use verification::SnapshotVerifier;

/// Hash a file's content the way the content store does
pub use utils::hash_file_content;
/// Hash in-memory data the way the content store does
pub use utils::hash_data;
/// Human-readable byte count
pub use utils::format_bytes;
