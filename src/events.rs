//! Structured engine events
//!
//! The orchestrator reports what it does through an [`EventSink`] handed to
//! it by the caller. Sinks are explicit values, never process-global state:
//! a GUI subscribes with its own sink, the CLI prints, and every backup run
//! additionally appends to `repo/logs/backup-<snapshot>.jsonl`.
//!
//! Each event serializes as one flat JSON object with an `event` kind tag and
//! an RFC 3339 `ts` timestamp:
//!
//! ```text
//! {"ts":"2024-05-01T10:00:00+02:00","event":"blob_copy","path":"docs/a.txt","hash":"2cf2..."}
//! ```

use crate::error::{Result, SnapstoreError};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One engine event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A backup run started
    Start {
        snapshot: String,
        repository: PathBuf,
        sources: Vec<PathBuf>,
    },
    /// A configured source root does not exist; it is skipped
    SourceMissing { source: PathBuf },
    /// A file did not pass the filter and is left out of the snapshot
    SkipByFilter { path: PathBuf },
    /// New content was copied into the store
    BlobCopy { path: String, hash: String, size: u64 },
    /// Content already present in the store was reused
    BlobReuse { path: String, hash: String },
    /// Content matches the previous snapshot for the same logical path
    Unchanged { path: String, hash: String },
    /// Processing a file failed
    Error {
        path: PathBuf,
        attempt: u32,
        max_attempts: u32,
        message: String,
        /// True once no attempts remain and the file is dropped
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// A shadow copy is serving reads for the run
    ShadowCopyActive { volumes: Vec<String> },
    /// Shadow copies were requested but the run uses the live filesystem
    ShadowCopyUnavailable { reason: String },
    /// The run finished and its manifest was written
    Done {
        snapshot: String,
        entry_count: usize,
        failed_count: usize,
        skipped_count: usize,
    },
}

impl Event {
    /// The serialized kind tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Start { .. } => "start",
            Event::SourceMissing { .. } => "source_missing",
            Event::SkipByFilter { .. } => "skip_by_filter",
            Event::BlobCopy { .. } => "blob_copy",
            Event::BlobReuse { .. } => "blob_reuse",
            Event::Unchanged { .. } => "unchanged",
            Event::Error { .. } => "error",
            Event::ShadowCopyActive { .. } => "shadow_copy_active",
            Event::ShadowCopyUnavailable { .. } => "shadow_copy_unavailable",
            Event::Done { .. } => "done",
        }
    }
}

/// An event stamped with the local time it was emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Emission time
    pub ts: DateTime<Local>,
    /// The event itself, flattened next to `ts`
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    /// Stamp an event with the current time
    pub fn now(event: Event) -> Self {
        Self { ts: Local::now(), event }
    }
}

/// Receiver of engine events
///
/// Implementations must not fail the run: a sink that cannot record an event
/// logs the problem and drops it.
pub trait EventSink: Send + Sync {
    /// Record one event
    fn emit(&self, record: &EventRecord);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _record: &EventRecord) {}
}

/// Sink that keeps events in memory, for tests and front-ends
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemorySink {
    /// Create an empty memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Number of recorded events with the given kind tag
    pub fn count(&self, kind: &str) -> usize {
        self.records.lock().iter().filter(|r| r.event.kind() == kind).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, record: &EventRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Sink that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: &EventRecord) {
        match &record.event {
            Event::Error { path, attempt, max_attempts, message, is_final } => {
                warn!(?path, attempt, max_attempts, is_final, "{}", message);
            }
            Event::SourceMissing { source } => warn!(?source, "source missing"),
            Event::ShadowCopyUnavailable { reason } => warn!("shadow copy unavailable: {}", reason),
            Event::Start { .. } | Event::Done { .. } => info!(event = ?record.event),
            other => debug!(event = ?other),
        }
    }
}

/// Sink appending JSON Lines to a log file
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open (or create) a JSONL log for appending
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, record: &EventRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode event {}: {}", record.event.kind(), e);
                return;
            }
        };
        let mut writer = self.writer.lock();
        // Flushed per line so the log survives an aborted run.
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to append to {:?}: {}", self.path, e);
        }
    }
}

/// Sink that forwards each event to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &format!("<{} sinks>", self.sinks.len()))
            .finish()
    }
}

impl FanoutSink {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Stamp and forward an event
    pub fn send(&self, event: Event) {
        let record = EventRecord::now(event);
        self.emit(&record);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, record: &EventRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}

/// Read back a JSONL event log
pub fn read_log(path: &Path) -> Result<Vec<EventRecord>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SnapstoreError::from))
        .collect()
}
