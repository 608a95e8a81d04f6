//! Main test module for Snapstore
//!
//! This module includes all test suites:
//! - Integration tests for complete backup, restore and verify runs
//! - Property-based tests for invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::snapstore::*;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_empty_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("empty");
        fs::create_dir_all(&source).unwrap();
        let repo = Repository::new(temp_dir.path().join("repo"));

        let report = repo.backup(&BackupOptions::new(vec![source])).unwrap();

        assert_eq!(report.entry_count, 0);
        let manifest = repo.manifest(&report.snapshot_id).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(repo.verify("latest").unwrap().ok, 0);
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("docs");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("empty.txt"), b"").unwrap();
        let repo = Repository::new(temp_dir.path().join("repo"));

        repo.backup(&BackupOptions::new(vec![source])).unwrap();

        let entry = repo.manifest("latest").unwrap().entries[0].clone();
        assert_eq!(entry.size, Some(0));
        assert_eq!(entry.hash, Some(hash_data(b"")));
        let out = temp_dir.path().join("out");
        repo.restore_file("latest", "docs/empty.txt", &out).unwrap();
        assert_eq!(fs::read(out.join("empty.txt")).unwrap(), b"");
    }

    #[test]
    fn test_unicode_and_spaces_in_names() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("belgeler");
        fs::create_dir_all(source.join("alt klasör")).unwrap();
        fs::write(source.join("alt klasör").join("özet notlar.txt"), "içerik").unwrap();
        let repo = Repository::new(temp_dir.path().join("repo"));

        repo.backup(&BackupOptions::new(vec![source])).unwrap();

        let manifest = repo.manifest("latest").unwrap();
        assert_eq!(manifest.entries[0].path, "belgeler/alt klasör/özet notlar.txt");
        let out = temp_dir.path().join("out");
        repo.restore_file("latest", "belgeler/alt klasör/özet notlar.txt", &out).unwrap();
        assert_eq!(fs::read_to_string(out.join("özet notlar.txt")).unwrap(), "içerik");
    }

    #[test]
    fn test_two_backups_in_the_same_second_get_distinct_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("docs");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), "a").unwrap();
        let repo = Repository::new(temp_dir.path().join("repo"));
        let options = BackupOptions::new(vec![source]);

        let ids: Vec<String> = (0..3)
            .map(|_| repo.backup(&options).unwrap().snapshot_id)
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, ids);
        assert_eq!(repo.list_snapshots().unwrap(), ids);
    }

    #[test]
    fn test_source_root_removed_between_runs() {
        let temp_dir = TempDir::new().unwrap();
        let docs = temp_dir.path().join("docs");
        let photos = temp_dir.path().join("photos");
        fs::create_dir_all(&docs).unwrap();
        fs::create_dir_all(&photos).unwrap();
        fs::write(docs.join("a.txt"), "a").unwrap();
        fs::write(photos.join("p.jpg"), "jpeg").unwrap();
        let repo = Repository::new(temp_dir.path().join("repo"));
        let sink = MemorySink::new();
        let options = BackupOptions::new(vec![docs, photos.clone()])
            .backoff_unit(Duration::ZERO)
            .event_sink(Arc::new(sink.clone()));

        repo.backup(&options).unwrap();
        fs::remove_dir_all(&photos).unwrap();
        let report = repo.backup(&options).unwrap();

        assert_eq!(report.sources_missing.len(), 1);
        assert_eq!(report.entry_count, 1);
        assert_eq!(sink.count("source_missing"), 1);
        assert!(repo.manifest("latest").unwrap().get("photos/p.jpg").is_none());
    }

    #[test]
    fn test_operations_on_empty_repository() {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::new(temp_dir.path());

        assert!(repo.list_snapshots().unwrap().is_empty());
        assert!(matches!(repo.verify("latest"), Err(SnapstoreError::NoSnapshots)));
        assert!(matches!(
            repo.restore_snapshot("latest", &temp_dir.path().join("out")),
            Err(SnapstoreError::NoSnapshots)
        ));
        assert_eq!(repo.stats().unwrap().blob_count, 0);
    }
}
