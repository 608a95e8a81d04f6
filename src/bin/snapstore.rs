//! # Snapstore CLI
//!
//! Command-line front-end for snapstore repositories.
//!
//! ## Usage
//! ```bash
//! # Back up two directories, skipping temp files
//! snapstore -r /backups/repo backup /data/docs /data/photos -p '*.tmp' --progress
//!
//! # Or take everything from a configuration file
//! snapstore --config backup.json backup
//!
//! # List snapshots
//! snapstore -r /backups/repo list
//!
//! # Restore the newest snapshot, or a single file from it
//! snapstore -r /backups/repo restore latest /tmp/restore
//! snapstore -r /backups/repo restore-file latest docs/a.txt /tmp
//!
//! # Check that every referenced blob is present (--deep re-hashes them)
//! snapstore -r /backups/repo verify latest --deep
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use snapstore::{
    format_bytes, BackupConfig, BackupOptions, Event, EventRecord, EventSink, PatternMode,
    Repository, SnapstoreError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Snapstore CLI - incremental, deduplicating directory backups
#[derive(Parser)]
#[command(name = "snapstore")]
#[command(version)]
#[command(about = "Incremental, content-addressed snapshot backups of directory trees")]
#[command(long_about = None)]
struct Cli {
    /// Repository directory
    #[arg(short, long, global = true)]
    repo: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new snapshot
    #[command(alias = "b")]
    Backup {
        /// Source directories (default: from the configuration file)
        sources: Vec<PathBuf>,

        /// Glob pattern, may be repeated
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// How patterns select files
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Read through volume shadow copies (Windows, administrator)
        #[arg(long)]
        shadow_copy: bool,

        /// Attempts per file
        #[arg(long)]
        max_retries: Option<u32>,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// List snapshots
    #[command(alias = "ls")]
    List {
        /// Show entry counts and sizes
        #[arg(short, long)]
        detailed: bool,
    },

    /// Restore a whole snapshot
    #[command(alias = "rs")]
    Restore {
        /// Snapshot identifier or 'latest'
        snapshot: String,

        /// Target directory
        target: PathBuf,
    },

    /// Restore a single file
    RestoreFile {
        /// Snapshot identifier or 'latest'
        snapshot: String,

        /// Path inside the snapshot, e.g. docs/a.txt
        path: String,

        /// Target directory
        target: PathBuf,
    },

    /// Verify that a snapshot's blobs are present
    Verify {
        /// Snapshot identifier or 'latest'
        #[arg(default_value = "latest")]
        snapshot: String,

        /// Also re-hash every blob
        #[arg(long)]
        deep: bool,
    },

    /// Show repository information
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Include,
    Exclude,
}

impl From<ModeArg> for PatternMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Include => PatternMode::Include,
            ModeArg::Exclude => PatternMode::Exclude,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<SnapstoreError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Some(
            BackupConfig::load(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
        ),
        None => None,
    };
    let repo_path = cli
        .repo
        .clone()
        .or_else(|| config.as_ref().map(|c| c.repository.clone()))
        .ok_or_else(|| anyhow!("no repository given (use --repo or --config)"))?;
    let repo = Repository::new(repo_path);

    match cli.command {
        Commands::Backup { sources, patterns, mode, shadow_copy, max_retries, progress } => {
            let options = backup_options(config.as_ref(), sources, patterns, mode, shadow_copy, max_retries)?;
            cmd_backup(&repo, options, progress)
        }
        Commands::List { detailed } => cmd_list(&repo, detailed),
        Commands::Restore { snapshot, target } => cmd_restore(&repo, &snapshot, target),
        Commands::RestoreFile { snapshot, path, target } => cmd_restore_file(&repo, &snapshot, &path, target),
        Commands::Verify { snapshot, deep } => cmd_verify(&repo, &snapshot, deep),
        Commands::Info => cmd_info(&repo),
    }
}

/// Merge command-line arguments over the configuration file
fn backup_options(
    config: Option<&BackupConfig>,
    sources: Vec<PathBuf>,
    patterns: Vec<String>,
    mode: Option<ModeArg>,
    shadow_copy: bool,
    max_retries: Option<u32>,
) -> anyhow::Result<BackupOptions> {
    let mut options = match config {
        Some(config) => config.to_options(),
        None => BackupOptions::new(Vec::new()),
    };
    if !sources.is_empty() {
        options = BackupOptions::new(sources)
            .filter(options.filter_spec().clone())
            .use_shadow_copy(options.shadow_copy_requested())
            .max_retries(options.retry_policy().max_attempts());
    }
    if !patterns.is_empty() || mode.is_some() {
        let patterns = (!patterns.is_empty()).then_some(patterns);
        let filter = options
            .filter_spec()
            .override_with(patterns, mode.map(PatternMode::from))?;
        options = options.filter(filter);
    }
    if shadow_copy {
        options = options.use_shadow_copy(true);
    }
    if let Some(attempts) = max_retries {
        if attempts == 0 {
            return Err(anyhow!("--max-retries must be at least 1"));
        }
        options = options.max_retries(attempts);
    }
    Ok(options)
}

/// Spinner fed by engine events
struct SpinnerSink {
    bar: ProgressBar,
}

impl EventSink for SpinnerSink {
    fn emit(&self, record: &EventRecord) {
        match &record.event {
            Event::BlobCopy { path, .. } | Event::BlobReuse { path, .. } | Event::Unchanged { path, .. } => {
                self.bar.inc(1);
                self.bar.set_message(path.clone());
            }
            Event::Error { path, is_final: true, .. } => {
                self.bar.println(format!("{} {}", "✗".red().bold(), path.display()));
            }
            _ => {}
        }
    }
}

fn cmd_backup(repo: &Repository, mut options: BackupOptions, show_progress: bool) -> anyhow::Result<()> {
    println!("{}", "Creating snapshot...".blue().bold());

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{pos}] {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Scanning files...");
        options = options.event_sink(Arc::new(SpinnerSink { bar: pb.clone() }));
        Some(pb)
    } else {
        None
    };

    let report = repo.backup(&options);

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = report?;

    println!("{} Created snapshot {}", "✓".green().bold(), report.snapshot_id.yellow().bold());
    println!("  Files: {}", report.entry_count.to_string().cyan());
    println!("  Stored: {}", report.blobs_copied.to_string().cyan());
    println!("  Reused: {}", report.blobs_reused.to_string().cyan());
    println!("  Unchanged: {}", report.files_unchanged.to_string().cyan());
    if report.files_skipped > 0 {
        println!("  Skipped by filter: {}", report.files_skipped);
    }
    if report.used_shadow_copy {
        println!("  Shadow copy: {}", "active".green());
    }
    println!("  Read: {}", format_bytes(report.bytes_hashed).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms)).to_string().cyan()
    );

    for source in &report.sources_missing {
        println!("  {} source missing: {}", "!".yellow().bold(), source.display());
    }
    if report.files_failed > 0 {
        println!(
            "  {} {} files could not be read; see the log for details",
            "!".yellow().bold(),
            report.files_failed.to_string().red()
        );
    }
    Ok(())
}

fn cmd_list(repo: &Repository, detailed: bool) -> anyhow::Result<()> {
    let ids = repo.list_snapshots()?;
    if ids.is_empty() {
        println!("{}", "No snapshots yet".yellow());
        return Ok(());
    }

    println!("{}", format!("{} snapshots:", ids.len()).bold());
    for id in &ids {
        if detailed {
            match repo.manifest(id) {
                Ok(manifest) => println!(
                    "  {}  {} files, {}",
                    id.yellow(),
                    manifest.len(),
                    format_bytes(manifest.total_size())
                ),
                Err(SnapstoreError::ManifestMissing(_)) => {
                    println!("  {}  {}", id.yellow(), "incomplete (no manifest)".red())
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            println!("  {}", id.yellow());
        }
    }
    Ok(())
}

fn cmd_restore(repo: &Repository, snapshot: &str, target: PathBuf) -> anyhow::Result<()> {
    println!("{}", format!("Restoring {}...", snapshot).blue().bold());
    let result = repo.restore_snapshot(snapshot, &target)?;

    println!("{} Restored snapshot {}", "✓".green().bold(), result.snapshot_id.yellow().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    println!("  Bytes written: {}", format_bytes(result.bytes_written).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );
    Ok(())
}

fn cmd_restore_file(repo: &Repository, snapshot: &str, path: &str, target: PathBuf) -> anyhow::Result<()> {
    let result = repo.restore_file(snapshot, path, &target)?;
    for restored in &result.restored_paths {
        println!(
            "{} Restored {} from {} to {}",
            "✓".green().bold(),
            path.cyan(),
            result.snapshot_id.yellow(),
            restored.display()
        );
    }
    Ok(())
}

fn cmd_verify(repo: &Repository, snapshot: &str, deep: bool) -> anyhow::Result<()> {
    let report = if deep {
        println!("{}", "Verifying snapshot contents...".blue().bold());
        repo.verify_contents(snapshot)?
    } else {
        repo.verify(snapshot)?
    };

    println!("\n{}", format!("Snapshot {}:", report.snapshot_id).bold());
    println!("  OK: {}", report.ok.to_string().green());
    println!("  Missing: {}", colored_count(report.missing));
    if deep {
        println!("  Corrupt: {}", colored_count(report.corrupt));
    }
    if report.ignored > 0 {
        println!("  Without hash: {}", report.ignored);
    }
    for path in &report.missing_paths {
        println!("  {} missing {}", "✗".red(), path);
    }
    for path in &report.corrupt_paths {
        println!("  {} corrupt {}", "✗".red(), path);
    }

    if report.is_valid() {
        println!("{} Snapshot is intact", "✓".green().bold());
        Ok(())
    } else {
        Err(anyhow!("verification failed: {}", report.summary()))
    }
}

fn cmd_info(repo: &Repository) -> anyhow::Result<()> {
    let ids = repo.list_snapshots()?;
    let stats = repo.stats()?;

    println!("{}", "Repository Information".bold());
    println!("  Location: {}", repo.root().display());
    println!("  Snapshots: {}", ids.len().to_string().cyan());
    if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
        println!("  Oldest: {}", first.yellow());
        println!("  Newest: {}", last.yellow());
    }
    println!("  Blobs: {}", stats.blob_count.to_string().cyan());
    println!("  Stored: {}", format_bytes(stats.total_bytes).cyan());
    Ok(())
}

fn colored_count(count: usize) -> ColoredString {
    if count == 0 {
        count.to_string().green()
    } else {
        count.to_string().red()
    }
}
