//! Property-based testing for Snapstore
//!
//! Uses proptest to check deduplication, filtering and restore invariants
//! across randomly generated trees.

use ::snapstore::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Generate relative file paths of one to three components
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dirs = prop::collection::vec("[a-z]{1,6}", 0..=2);
    let file = prop_oneof![
        "[a-z]{1,8}\\.(txt|log|tmp|rs)",
        "file[0-9]{1,3}",
    ];
    (dirs, file).prop_map(|(dirs, file)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path.push(format!("d_{}", dir));
        }
        path.push(file);
        path
    })
}

/// Generate contents from a small pool so duplicates are common
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(b"shared".to_vec()),
        Just(Vec::new()),
        prop::collection::vec(any::<u8>(), 0..64),
    ]
}

/// Generate a tree as relative path -> content
fn tree_strategy() -> impl Strategy<Value = BTreeMap<PathBuf, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 1..12)
}

fn write_tree(root: &Path, tree: &BTreeMap<PathBuf, Vec<u8>>) {
    for (relative, content) in tree {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_one_blob_per_distinct_content(tree in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        write_tree(&source, &tree);
        let repo = Repository::new(temp_dir.path().join("repo"));

        let report = repo.backup(&BackupOptions::new(vec![source])).unwrap();

        let distinct: BTreeSet<String> = tree.values().map(|c| hash_data(c)).collect();
        let stored: BTreeSet<String> = ContentStore::open_existing(repo.root())
            .list_blobs()
            .unwrap()
            .into_iter()
            .collect();
        prop_assert_eq!(stored, distinct.clone());
        prop_assert_eq!(report.blobs_copied, distinct.len());
        prop_assert_eq!(report.blobs_copied + report.blobs_reused, tree.len());
    }

    #[test]
    fn prop_restore_round_trip(tree in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        write_tree(&source, &tree);
        let repo = Repository::new(temp_dir.path().join("repo"));
        repo.backup(&BackupOptions::new(vec![source])).unwrap();

        let target = temp_dir.path().join("out");
        let result = repo.restore_snapshot("latest", &target).unwrap();

        prop_assert_eq!(result.files_restored, tree.len());
        for (relative, content) in &tree {
            let restored = fs::read(target.join("src").join(relative)).unwrap();
            prop_assert_eq!(&restored, content);
        }
    }

    #[test]
    fn prop_include_and_exclude_partition_files(
        tree in tree_strategy(),
        patterns in prop::collection::vec(prop_oneof![
            Just("*.tmp"), Just("*.log"), Just("file*"), Just("*/d_a*/*"),
        ], 0..3),
    ) {
        let include = FilterSpec::new(patterns.clone(), PatternMode::Include).unwrap();
        let exclude = FilterSpec::new(patterns, PatternMode::Exclude).unwrap();

        for relative in tree.keys() {
            let path = Path::new("/data/src").join(relative);
            prop_assert_ne!(include.should_process(&path), exclude.should_process(&path));
        }
    }

    #[test]
    fn prop_manifest_paths_unique_and_verified(tree in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        write_tree(&source, &tree);
        let repo = Repository::new(temp_dir.path().join("repo"));
        repo.backup(&BackupOptions::new(vec![source.clone()])).unwrap();
        repo.backup(&BackupOptions::new(vec![source])).unwrap();

        let manifest = repo.manifest("latest").unwrap();
        let paths: BTreeSet<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        prop_assert_eq!(paths.len(), manifest.len());
        prop_assert_eq!(manifest.len(), tree.len());

        let report = repo.verify("latest").unwrap();
        prop_assert_eq!(report.ok, tree.len());
        prop_assert_eq!(report.missing, 0);
    }
}
