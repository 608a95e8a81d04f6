//! Performance benchmarks for Snapstore
//!
//! Tracks hashing throughput, first and incremental backup time, and
//! restore time.

#![cfg_attr(feature = "quick-bench", allow(dead_code))]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snapstore::{hash_data, hash_file_content, BackupOptions, Repository};
use std::fs;
use std::hint::black_box;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Fill `dir` with `count` files of a few hundred bytes, a tenth of them duplicates
fn populate(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let seed = if i % 10 == 9 { 0 } else { i };
        let content: Vec<u8> = (0..(100 + seed % 900))
            .map(|n| ((n * 31 + seed * 17) % 251) as u8)
            .collect();
        fs::write(dir.join(format!("file_{}.bin", i)), content).unwrap();
    }
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");
    group.measurement_time(Duration::from_secs(2));

    for size in [4 * 1024, 1024 * 1024, 16 * 1024 * 1024] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("memory", size), &data, |b, data| {
            b.iter(|| black_box(hash_data(data)));
        });

        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("blob");
        fs::write(&file, &data).unwrap();
        group.bench_with_input(BenchmarkId::new("file", size), &file, |b, file| {
            b.iter(|| black_box(hash_file_content(file).unwrap()));
        });
    }

    group.finish();
}

/// First backup into an empty repository
fn bench_first_backup(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_backup");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    for file_count in [10, 100, 500] {
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            &file_count,
            |b, &file_count| {
                let temp_dir = TempDir::new().unwrap();
                let source = temp_dir.path().join("data");
                populate(&source, file_count);
                let options = BackupOptions::new(vec![source]);

                b.iter_with_setup(
                    || TempDir::new().unwrap(),
                    |repo_dir| {
                        let report = Repository::new(repo_dir.path()).backup(&options).unwrap();
                        black_box(report);
                    },
                );
            },
        );
    }

    group.finish();
}

/// Backup of a tree where only one file changed since the previous snapshot
fn bench_incremental_backup(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_backup");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    for file_count in [100, 500] {
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            &file_count,
            |b, &file_count| {
                let temp_dir = TempDir::new().unwrap();
                let source = temp_dir.path().join("data");
                populate(&source, file_count);
                let repo = Repository::new(temp_dir.path().join("repo"));
                let options = BackupOptions::new(vec![source.clone()]);
                repo.backup(&options).unwrap();

                let mut round = 0u64;
                b.iter(|| {
                    round += 1;
                    fs::write(source.join("file_0.bin"), round.to_le_bytes()).unwrap();
                    black_box(repo.backup(&options).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("restore");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    for file_count in [100, 500] {
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            &file_count,
            |b, &file_count| {
                let temp_dir = TempDir::new().unwrap();
                let source = temp_dir.path().join("data");
                populate(&source, file_count);
                let repo = Repository::new(temp_dir.path().join("repo"));
                repo.backup(&BackupOptions::new(vec![source])).unwrap();

                b.iter_with_setup(
                    || TempDir::new().unwrap(),
                    |target| black_box(repo.restore_snapshot("latest", target.path()).unwrap()),
                );
            },
        );
    }

    group.finish();
}

#[cfg(feature = "quick-bench")]
criterion_group!(benches, bench_hashing, bench_first_backup);

#[cfg(not(feature = "quick-bench"))]
criterion_group!(
    benches,
    bench_hashing,
    bench_first_backup,
    bench_incremental_backup,
    bench_restore
);

criterion_main!(benches);
