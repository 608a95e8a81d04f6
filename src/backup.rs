//! Incremental backup orchestration
//!
//! [`backup`] drives one run end to end:
//!
//! 1. resolve the repository and sources, creating `.store/`, `snapshots/`
//!    and `logs/` as needed
//! 2. load the previous manifest and index it by logical path
//! 3. allocate the snapshot directory from the current time
//! 4. enter the shadow-copy context when requested
//! 5. walk every source; each file is filtered, hashed, stored (or found
//!    unchanged), materialized and recorded, under the retry policy
//! 6. release the shadow-copy context, whatever happened during the walk
//! 7. write the manifest and report
//!
//! Every file is read in full on every run: incrementality saves store writes,
//! not scan I/O. Files whose hash equals the previous snapshot's entry for the
//! same logical path are still recorded and hard-linked into the new snapshot,
//! so each manifest describes its snapshot completely on its own.
//!
//! Per-file failures are recovered locally. Only configuration problems and
//! an unwritable repository abort the run.

use crate::config::{self, BackupOptions, FailureHook};
use crate::error::{Result, SnapstoreError};
use crate::events::{Event, FanoutSink, JsonlSink, TracingSink};
use crate::filter::FilterSpec;
use crate::manifest::{self, ManifestBuilder};
use crate::materialize::materialize;
use crate::retry::RetryPolicy;
use crate::shadow::ShadowCopyContext;
use crate::snapshot::{self, Snapshot, LOGS_DIR, SNAPSHOTS_DIR};
use crate::storage::ContentStore;
use crate::types::{BackupReport, ManifestEntry};
use crate::utils;
use chrono::Local;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// How a successfully processed file reached the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Copied,
    Reused,
    Unchanged,
}

/// Back up `options.sources` into a new snapshot of `repository`
///
/// # Errors
///
/// - [`SnapstoreError::NoSources`] / [`SnapstoreError::DuplicateSourceName`] for bad sources
/// - [`SnapstoreError::Io`] if the repository cannot be written
///
/// Errors reading individual files are not returned; they are retried,
/// reported as `error` events and counted in [`BackupReport::files_failed`].
#[instrument(skip(options), fields(sources = options.sources.len()))]
pub fn backup(repository: &Path, options: &BackupOptions) -> Result<BackupReport> {
    let started = Instant::now();
    let repository = std::path::absolute(repository)?;
    let sources = options
        .sources
        .iter()
        .map(|source| utils::resolve_source(source))
        .collect::<Result<Vec<PathBuf>>>()?;
    config::validate_sources(&sources)?;
    info!("Backing up {} sources into {:?}", sources.len(), repository);

    let store = ContentStore::open(&repository)?;
    fs::create_dir_all(repository.join(SNAPSHOTS_DIR))?;
    fs::create_dir_all(repository.join(LOGS_DIR))?;

    let previous = manifest::load_previous(&repository)?;
    let previous_hashes = previous.entries_by_path();
    debug!(
        "Previous manifest {:?} has {} entries",
        previous.timestamp,
        previous_hashes.len()
    );

    let snapshot = snapshot::allocate(&repository, &Local::now())?;

    let log = JsonlSink::open(&snapshot::log_path(&repository, snapshot.id()))?;
    let mut events = FanoutSink::new()
        .with(Arc::new(log))
        .with(Arc::new(TracingSink));
    if let Some(sink) = &options.sink {
        events = events.with(Arc::clone(sink));
    }

    events.send(Event::Start {
        snapshot: snapshot.id().to_string(),
        repository: repository.clone(),
        sources: sources.clone(),
    });

    let mut shadow = ShadowCopyContext::open(options.use_shadow_copy, &sources, &events);
    let used_shadow_copy = shadow.is_active();

    let mut scan = Scan {
        store: &store,
        snapshot: &snapshot,
        previous: &previous_hashes,
        filter: &options.filter,
        retry: options.retry_policy(),
        hook: options.failure_hook.as_ref(),
        events: &events,
        builder: ManifestBuilder::new(snapshot.id()),
        report: BackupReport {
            snapshot_id: snapshot.id().to_string(),
            used_shadow_copy,
            ..Default::default()
        },
    };

    let walked = sources
        .iter()
        .try_for_each(|source| scan.walk_source(source, &shadow));
    shadow.release();
    walked?;

    let Scan { builder, mut report, .. } = scan;
    let manifest = builder.build();
    manifest::write(&snapshot, &manifest)?;

    report.entry_count = manifest.len();
    report.duration_ms = started.elapsed().as_millis() as u64;

    events.send(Event::Done {
        snapshot: snapshot.id().to_string(),
        entry_count: report.entry_count,
        failed_count: report.files_failed,
        skipped_count: report.files_skipped,
    });

    info!(
        "Created snapshot {} in {:?} ({} entries, {} stored, {} reused, {} unchanged, {} failed, {} hashed)",
        snapshot.id(),
        started.elapsed(),
        report.entry_count,
        report.blobs_copied,
        report.blobs_reused,
        report.files_unchanged,
        report.files_failed,
        utils::format_bytes(report.bytes_hashed)
    );

    Ok(report)
}

/// State of one run's walk over its sources
struct Scan<'a> {
    store: &'a ContentStore,
    snapshot: &'a Snapshot,
    previous: &'a HashMap<String, String>,
    filter: &'a FilterSpec,
    retry: RetryPolicy,
    hook: Option<&'a FailureHook>,
    events: &'a FanoutSink,
    builder: ManifestBuilder,
    report: BackupReport,
}

impl Scan<'_> {
    fn walk_source(&mut self, source: &Path, shadow: &ShadowCopyContext) -> Result<()> {
        let root_name = utils::root_name(source)?;
        let read_root = shadow.map_path(source);

        if !read_root.exists() {
            warn!("Source {:?} does not exist, skipping", source);
            self.events.send(Event::SourceMissing { source: source.to_path_buf() });
            self.report.sources_missing.push(source.to_path_buf());
            return Ok(());
        }

        debug!("Scanning {:?} as '{}' (reading {:?})", source, root_name, read_root);
        for entry in WalkDir::new(&read_root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                    warn!("Cannot read {:?}: {}", path, e);
                    self.events.send(Event::Error {
                        path,
                        attempt: 1,
                        max_attempts: 1,
                        message: e.to_string(),
                        is_final: true,
                    });
                    self.report.files_failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&read_root).map_err(|_| {
                SnapstoreError::internal(format!("{:?} escaped {:?}", entry.path(), read_root))
            })?;
            let live_path = if relative.as_os_str().is_empty() {
                source.to_path_buf()
            } else {
                source.join(relative)
            };

            if !self.filter.should_process(&live_path) {
                self.events.send(Event::SkipByFilter { path: live_path });
                self.report.files_skipped += 1;
                continue;
            }

            let logical = utils::logical_path(&root_name, relative);
            self.back_up_file(entry.path(), &live_path, logical);
        }
        Ok(())
    }

    fn back_up_file(&mut self, read_path: &Path, live_path: &Path, logical: String) {
        let processed = self.retry.run(live_path, self.events, |attempt| {
            self.process(read_path, live_path, &logical, attempt)
        });

        match processed {
            Ok((entry, outcome)) => {
                self.report.bytes_hashed += entry.size.unwrap_or(0);
                match outcome {
                    FileOutcome::Copied => self.report.blobs_copied += 1,
                    FileOutcome::Reused => self.report.blobs_reused += 1,
                    FileOutcome::Unchanged => self.report.files_unchanged += 1,
                }
                self.builder.push(entry);
            }
            Err(e) => {
                warn!("Dropping {} from the snapshot: {}", logical, e);
                self.report.files_failed += 1;
            }
        }
    }

    fn process(
        &self,
        read_path: &Path,
        live_path: &Path,
        logical: &str,
        attempt: u32,
    ) -> Result<(ManifestEntry, FileOutcome)> {
        if let Some(hook) = self.hook {
            hook(live_path, attempt)?;
        }

        let hash = utils::hash_file_content(read_path)?;

        let outcome = if self.previous.get(logical) == Some(&hash) && self.store.exists(&hash) {
            self.events.send(Event::Unchanged {
                path: logical.to_string(),
                hash: hash.clone(),
            });
            FileOutcome::Unchanged
        } else if self.store.put_hashed(read_path, &hash, logical, self.events)?.reused {
            FileOutcome::Reused
        } else {
            FileOutcome::Copied
        };

        let relative = utils::safe_relative_path(logical).ok_or_else(|| {
            SnapstoreError::internal(format!("Logical path {} cannot be materialized", logical))
        })?;
        materialize(&self.store.path_for(&hash), &self.snapshot.files_dir().join(relative))?;

        let (size, mtime) = match fs::metadata(read_path) {
            Ok(metadata) => (Some(metadata.len()), utils::modified_secs(&metadata)),
            Err(e) => {
                debug!("stat {:?} failed: {}", read_path, e);
                (None, None)
            }
        };

        Ok((ManifestEntry::new(logical, hash, size, mtime), outcome))
    }
}
