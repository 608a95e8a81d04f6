//! Integration tests for Snapstore
//!
//! Full backup, restore and verify runs against real directory trees,
//! checking deduplication, filtering, partial-failure tolerance and the
//! on-disk formats.

use ::snapstore::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test harness: a scratch area holding sources, a repository and restore targets
pub struct BackupHarness {
    pub temp_dir: TempDir,
    pub repo: Repository,
    pub sink: MemorySink,
}

impl BackupHarness {
    /// Create a new harness with an empty repository
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::new(temp_dir.path().join("repo"));
        Self { temp_dir, repo, sink: MemorySink::new() }
    }

    /// Create a source root with the given relative files
    pub fn source(&self, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let root = self.temp_dir.path().join("data").join(name);
        fs::create_dir_all(&root).unwrap();
        for (relative, content) in files {
            let path = root.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        root
    }

    /// Options recording events into the harness sink, without back-off sleeps
    pub fn options(&self, sources: Vec<PathBuf>) -> BackupOptions {
        BackupOptions::new(sources)
            .backoff_unit(Duration::ZERO)
            .event_sink(Arc::new(self.sink.clone()))
    }

    /// A fresh, not yet existing directory under the scratch area
    pub fn target(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("restore").join(name)
    }

    pub fn store(&self) -> ContentStore {
        ContentStore::open_existing(self.repo.root())
    }
}

/// Relative path -> content of every file below `root`
pub fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn test_end_to_end_docs_scenario() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"hello"), ("b.log", b"x")]);
    let filter = FilterSpec::new(["*.log"], PatternMode::Exclude).unwrap();
    let options = h.options(vec![docs]).filter(filter);

    let first = h.repo.backup(&options).unwrap();
    let manifest = h.repo.manifest(&first.snapshot_id).unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.entries[0].path, "docs/a.txt");
    assert_eq!(
        manifest.entries[0].hash.as_deref(),
        Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
    );
    assert_eq!(manifest.entries[0].size, Some(5));
    assert!(manifest.get("docs/b.log").is_none());

    let second = h.repo.backup(&options).unwrap();
    assert_ne!(first.snapshot_id, second.snapshot_id);
    assert_eq!(second.files_unchanged, 1);

    let report = h.repo.verify("latest").unwrap();
    assert_eq!(report.snapshot_id, second.snapshot_id);
    assert_eq!((report.ok, report.missing), (1, 0));
}

#[test]
fn test_dedup_across_paths_sources_and_runs() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"same"), ("deep/b.txt", b"same")]);
    let notes = h.source("notes", &[("c.txt", b"same"), ("d.txt", b"other")]);

    let first = h.repo.backup(&h.options(vec![docs.clone(), notes.clone()])).unwrap();
    assert_eq!(first.blobs_copied, 2);
    assert_eq!(first.blobs_reused, 2);

    // New file with already-stored content in a later run
    fs::write(docs.join("e.txt"), b"other").unwrap();
    let second = h.repo.backup(&h.options(vec![docs, notes])).unwrap();
    assert_eq!(second.blobs_copied, 0);
    assert_eq!(second.blobs_reused, 1);

    let blobs = h.store().list_blobs().unwrap();
    assert_eq!(blobs, {
        let mut expected = vec![hash_data(b"same"), hash_data(b"other")];
        expected.sort();
        expected
    });
}

#[test]
fn test_store_put_is_idempotent() {
    let h = BackupHarness::new();
    let store = ContentStore::open(h.repo.root()).unwrap();
    let source = h.source("docs", &[("a.txt", b"content")]).join("a.txt");

    let first = store.put_file(&source, "docs/a.txt", &h.sink).unwrap();
    let second = store.put_file(&source, "docs/a.txt", &h.sink).unwrap();

    assert_eq!(first.hash, second.hash);
    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(fs::read(store.path_for(&first.hash)).unwrap(), b"content");
    assert_eq!(h.sink.count("blob_copy"), 1);
    assert_eq!(h.sink.count("blob_reuse"), 1);
}

#[test]
fn test_filter_modes_are_opposites() {
    let files: &[(&str, &[u8])] = &[("a.tmp", b"t"), ("a.txt", b"x")];

    let h = BackupHarness::new();
    let docs = h.source("docs", files);
    let exclude = FilterSpec::new(["*.tmp"], PatternMode::Exclude).unwrap();
    h.repo.backup(&h.options(vec![docs]).filter(exclude)).unwrap();
    let manifest = h.repo.manifest("latest").unwrap();
    assert!(manifest.get("docs/a.txt").is_some());
    assert!(manifest.get("docs/a.tmp").is_none());

    let h = BackupHarness::new();
    let docs = h.source("docs", files);
    let include = FilterSpec::new(["*.tmp"], PatternMode::Include).unwrap();
    h.repo.backup(&h.options(vec![docs]).filter(include)).unwrap();
    let manifest = h.repo.manifest("latest").unwrap();
    assert!(manifest.get("docs/a.tmp").is_some());
    assert!(manifest.get("docs/a.txt").is_none());
    assert_eq!(h.sink.count("skip_by_filter"), 1);
}

#[test]
fn test_filter_matches_full_path() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("cache/x.bin", b"1"), ("keep/x.bin", b"2")]);
    let filter = FilterSpec::new(["*/cache/*"], PatternMode::Exclude).unwrap();

    h.repo.backup(&h.options(vec![docs]).filter(filter)).unwrap();

    let manifest = h.repo.manifest("latest").unwrap();
    assert!(manifest.get("docs/cache/x.bin").is_none());
    assert!(manifest.get("docs/keep/x.bin").is_some());
}

#[test]
fn test_restore_round_trip() {
    let h = BackupHarness::new();
    let files: &[(&str, &[u8])] = &[
        ("README.md", b"# Project"),
        ("src/main.rs", b"fn main() {}"),
        ("src/util/mod.rs", b"pub mod x;"),
        ("assets/logo.bin", &[0u8, 1, 2, 255, 254]),
        ("assets/copy.bin", &[0u8, 1, 2, 255, 254]),
    ];
    let project = h.source("project", files);

    let report = h.repo.backup(&h.options(vec![project.clone()])).unwrap();
    let target = h.target("full");
    let restored = h.repo.restore_snapshot(&report.snapshot_id, &target).unwrap();

    assert_eq!(restored.files_restored, files.len());
    assert_eq!(read_tree(&target.join("project")), read_tree(&project));
}

#[test]
fn test_restore_preserves_mtime() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"old")]);
    let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(docs.join("a.txt"), mtime).unwrap();

    h.repo.backup(&h.options(vec![docs])).unwrap();
    assert_eq!(
        h.repo.manifest("latest").unwrap().entries[0].mtime,
        Some(1_600_000_000)
    );

    let target = h.target("mtime");
    h.repo.restore_file("latest", "docs/a.txt", &target).unwrap();
    let restored = fs::metadata(target.join("a.txt")).unwrap();
    assert_eq!(filetime::FileTime::from_last_modification_time(&restored), mtime);
}

#[test]
fn test_single_file_restore_matches_manifest_hash() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("sub/a.txt", b"alpha"), ("b.txt", b"beta")]);
    h.repo.backup(&h.options(vec![docs])).unwrap();

    let target = h.target("single");
    let result = h.repo.restore_file("latest", "docs/sub/a.txt", &target).unwrap();

    assert_eq!(result.restored_paths, vec![target.join("a.txt")]);
    assert_eq!(read_tree(&target).len(), 1);
    let entry = h.repo.manifest("latest").unwrap().get("docs/sub/a.txt").cloned().unwrap();
    assert_eq!(Some(hash_file_content(&target.join("a.txt")).unwrap()), entry.hash);

    let missing = h.repo.restore_file("latest", "docs/nope.txt", &target).unwrap_err();
    assert!(matches!(missing, SnapstoreError::FileNotFoundInSnapshot { .. }));
}

#[test]
fn test_verify_detects_deleted_blob() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"a"), ("b.txt", b"b"), ("c.txt", b"c")]);
    h.repo.backup(&h.options(vec![docs])).unwrap();
    let before = h.repo.verify("latest").unwrap();
    assert_eq!((before.ok, before.missing), (3, 0));

    fs::remove_file(h.store().path_for(&hash_data(b"b"))).unwrap();

    let after = h.repo.verify("latest").unwrap();
    assert_eq!(after.ok, before.ok - 1);
    assert_eq!(after.missing, 1);
    assert_eq!(after.missing_paths, vec!["docs/b.txt"]);
}

#[test]
fn test_deep_verify_detects_altered_blob() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"a")]);
    h.repo.backup(&h.options(vec![docs])).unwrap();

    let blob = h.store().path_for(&hash_data(b"a"));
    // Break the hard link first so the snapshot tree keeps its copy.
    fs::remove_file(&blob).unwrap();
    fs::write(&blob, b"bitrot").unwrap();

    assert!(h.repo.verify("latest").unwrap().is_valid());
    let deep = h.repo.verify_contents("latest").unwrap();
    assert_eq!(deep.corrupt, 1);
    assert!(!deep.is_valid());
}

#[test]
fn test_retry_exhaustion_drops_only_the_failing_file() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("locked.db", b"busy"), ("ok.txt", b"fine")]);
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let hook: snapstore::config::FailureHook = Arc::new(move |path: &Path, _attempt: u32| {
        if path.ends_with("locked.db") {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SnapstoreError::Io(std::io::Error::other("sharing violation")))
        } else {
            Ok(())
        }
    });

    let report = h
        .repo
        .backup(&h.options(vec![docs]).max_retries(4).failure_hook(hook))
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(report.files_failed, 1);
    let manifest = h.repo.manifest(&report.snapshot_id).unwrap();
    assert!(manifest.get("docs/locked.db").is_none());
    assert!(manifest.get("docs/ok.txt").is_some());
    assert!(h.repo.verify(&report.snapshot_id).unwrap().is_valid());

    let errors: Vec<Event> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind() == "error")
        .collect();
    assert_eq!(errors.len(), 4);
    assert!(matches!(errors[3], Event::Error { attempt: 4, max_attempts: 4, is_final: true, .. }));
}

#[test]
fn test_transient_failure_recovers() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("flaky.txt", b"eventually")]);
    let hook: snapstore::config::FailureHook = Arc::new(|_: &Path, attempt: u32| {
        if attempt == 1 {
            Err(SnapstoreError::Io(std::io::Error::other("transient")))
        } else {
            Ok(())
        }
    });

    let report = h.repo.backup(&h.options(vec![docs]).failure_hook(hook)).unwrap();

    assert_eq!(report.files_failed, 0);
    assert_eq!(report.entry_count, 1);
    assert_eq!(h.sink.count("error"), 1);
}

#[test]
fn test_event_log_written_as_jsonl() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"a"), ("b.log", b"b")]);
    let filter = FilterSpec::new(["*.log"], PatternMode::Exclude).unwrap();
    let report = h.repo.backup(&h.options(vec![docs]).filter(filter)).unwrap();

    let log = h
        .repo
        .root()
        .join("logs")
        .join(format!("backup-{}.jsonl", report.snapshot_id));
    let records = snapstore::events::read_log(&log).unwrap();
    let kinds: Vec<&str> = records.iter().map(|r| r.event.kind()).collect();
    assert_eq!(kinds, vec!["start", "blob_copy", "skip_by_filter", "done"]);

    let raw = fs::read_to_string(&log).unwrap();
    let last: serde_json::Value = serde_json::from_str(raw.lines().last().unwrap()).unwrap();
    assert_eq!(last["event"], "done");
    assert_eq!(last["entry_count"], 1);
    assert!(last["ts"].is_string());
}

#[test]
fn test_manifest_document_format() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"hello")]);
    let report = h.repo.backup(&h.options(vec![docs])).unwrap();

    let path = h
        .repo
        .root()
        .join("snapshots")
        .join(&report.snapshot_id)
        .join("manifest.json");
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

    assert_eq!(doc["timestamp"], report.snapshot_id.as_str());
    let entry = &doc["entries"][0];
    assert_eq!(entry["path"], "docs/a.txt");
    assert_eq!(entry["hash"], hash_data(b"hello").as_str());
    assert_eq!(entry["size"], 5);
    assert!(entry["mtime"].is_i64());
    assert!(h
        .repo
        .root()
        .join("snapshots")
        .join(&report.snapshot_id)
        .join("files")
        .join("docs")
        .join("a.txt")
        .is_file());
}

#[test]
fn test_legacy_configuration_drives_backup() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"a"), ("scratch.tmp", b"t")]);
    let json = serde_json::json!({
        "repository": h.repo.root(),
        "sources": [docs],
        "exclude": ["*.tmp"],
    })
    .to_string();

    let config = BackupConfig::from_json(&json).unwrap();
    let repo = Repository::from_config(&config);
    let report = repo.backup(&config.to_options().backoff_unit(Duration::ZERO)).unwrap();

    assert_eq!(report.entry_count, 1);
    assert_eq!(report.files_skipped, 1);
}

#[test]
fn test_duplicate_source_names_rejected() {
    let h = BackupHarness::new();
    let a = h.temp_dir.path().join("a").join("docs");
    let b = h.temp_dir.path().join("b").join("docs");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();

    let err = h.repo.backup(&h.options(vec![a, b])).unwrap_err();

    assert!(matches!(err, SnapstoreError::DuplicateSourceName { .. }));
    assert!(h.repo.list_snapshots().unwrap().is_empty());
}

#[cfg(not(windows))]
#[test]
fn test_shadow_copy_request_degrades_to_live_files() {
    let h = BackupHarness::new();
    let docs = h.source("docs", &[("a.txt", b"a")]);

    let report = h.repo.backup(&h.options(vec![docs]).use_shadow_copy(true)).unwrap();

    assert!(!report.used_shadow_copy);
    assert_eq!(report.entry_count, 1);
    assert_eq!(h.sink.count("shadow_copy_unavailable"), 1);
}
