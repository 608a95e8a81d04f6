//! Content-addressable blob store
//!
//! Every distinct file content is kept exactly once under the repository's
//! `.store/` directory, named by its SHA-256 digest:
//!
//! ```text
//! repo/
//! └── .store/
//!     └── <hh>/          # First 2 hex chars of the hash
//!         └── <hash>     # Full 64-char hash
//! ```
//!
//! Sharding by the first two characters bounds directory fan-out to 256
//! entries at the top level.
//!
//! ## Write discipline
//!
//! `put` is idempotent. When a blob for the computed hash already exists the
//! source is not read again and a `blob_reuse` event is emitted; otherwise
//! the bytes are copied into a temp file inside the shard and renamed into
//! place, so a blob name never points at a partial copy. The copy is hashed
//! as it streams and discarded unless it matches the blob name, so a source
//! modified after hashing never lands under a stale digest. The store never
//! re-hashes an existing blob on write; [`ContentStore::verify_blob`] exists
//! for explicit deep checks.
//!
//! There is no locking: two writers racing on the same hash both write
//! identical content and the last rename wins.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use snapstore::storage::ContentStore;
//! use snapstore::events::NullSink;
//! use std::path::Path;
//!
//! # fn example() -> snapstore::Result<()> {
//! let store = ContentStore::open(Path::new("./repo"))?;
//! let outcome = store.put_bytes(b"hello", "docs/a.txt", &NullSink)?;
//! assert!(store.exists(&outcome.hash));
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SnapstoreError};
use crate::events::{Event, EventRecord, EventSink};
use crate::utils;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// Name of the blob directory inside a repository
pub const STORE_DIR: &str = ".store";

/// What `put` did with a piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// SHA-256 of the content
    pub hash: String,
    /// Content size in bytes
    pub size: u64,
    /// True if the blob already existed and nothing was written
    pub reused: bool,
}

/// Blob count and size of a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of blobs
    pub blob_count: usize,
    /// Total bytes across all blobs
    pub total_bytes: u64,
}

/// Hash-addressed blob storage under a repository
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open the store of a repository, creating `.store/` if needed
    pub fn open(repository: &Path) -> Result<Self> {
        let root = repository.join(STORE_DIR);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open the store of a repository without creating anything
    ///
    /// Used by read-only operations; lookups simply miss if the store is absent.
    pub fn open_existing(repository: &Path) -> Self {
        Self { root: repository.join(STORE_DIR) }
    }

    /// Directory holding the shards
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the blob for `hash`
    pub fn path_for(&self, hash: &str) -> PathBuf {
        let shard = hash.get(..2).unwrap_or(hash);
        self.root.join(shard).join(hash)
    }

    /// Whether a blob for `hash` is present
    pub fn exists(&self, hash: &str) -> bool {
        is_hash(hash) && self.path_for(hash).is_file()
    }

    /// Hash a file and store its content
    ///
    /// `logical` is only used to label the emitted event.
    pub fn put_file(&self, source: &Path, logical: &str, sink: &dyn EventSink) -> Result<PutOutcome> {
        let hash = utils::hash_file_content(source)?;
        self.put_hashed(source, &hash, logical, sink)
    }

    /// Store a file whose content hash is already known
    ///
    /// The caller vouches that `hash` is the digest of `source`'s content;
    /// the orchestrator calls this right after hashing.
    pub fn put_hashed(
        &self,
        source: &Path,
        hash: &str,
        logical: &str,
        sink: &dyn EventSink,
    ) -> Result<PutOutcome> {
        if !is_hash(hash) {
            return Err(SnapstoreError::internal(format!("Not a SHA-256 digest: {}", hash)));
        }

        let blob = self.path_for(hash);
        if blob.is_file() {
            let size = fs::metadata(&blob)?.len();
            trace!("Blob {} already stored", &hash[..8]);
            sink.emit(&EventRecord::now(Event::BlobReuse {
                path: logical.to_string(),
                hash: hash.to_string(),
            }));
            return Ok(PutOutcome { hash: hash.to_string(), size, reused: true });
        }

        let shard = blob
            .parent()
            .ok_or_else(|| SnapstoreError::internal(format!("Blob path {:?} has no shard", blob)))?;
        fs::create_dir_all(shard)?;

        let mut temp = NamedTempFile::new_in(shard)?;
        let mut reader = fs::File::open(source)?;
        let mut writer = HashingWriter::new(temp.as_file_mut());
        let size = io::copy(&mut reader, &mut writer)?;
        if writer.finish() != hash {
            return Err(SnapstoreError::ContentChanged {
                path: source.to_path_buf(),
                expected: hash.to_string(),
            });
        }
        let mtime = FileTime::from_last_modification_time(&reader.metadata()?);
        filetime::set_file_handle_times(temp.as_file(), None, Some(mtime))?;
        temp.persist(&blob).map_err(|e| SnapstoreError::Io(e.error))?;

        debug!("Stored blob {} ({} bytes) from {:?}", &hash[..8], size, source);
        sink.emit(&EventRecord::now(Event::BlobCopy {
            path: logical.to_string(),
            hash: hash.to_string(),
            size,
        }));
        Ok(PutOutcome { hash: hash.to_string(), size, reused: false })
    }

    /// Store in-memory content
    pub fn put_bytes(&self, content: &[u8], logical: &str, sink: &dyn EventSink) -> Result<PutOutcome> {
        let hash = utils::hash_data(content);
        let blob = self.path_for(&hash);

        if blob.is_file() {
            sink.emit(&EventRecord::now(Event::BlobReuse {
                path: logical.to_string(),
                hash: hash.clone(),
            }));
            return Ok(PutOutcome { hash, size: content.len() as u64, reused: true });
        }

        let shard = self.root.join(&hash[..2]);
        fs::create_dir_all(&shard)?;
        let mut temp = NamedTempFile::new_in(&shard)?;
        temp.write_all(content)?;
        temp.flush()?;
        temp.persist(&blob).map_err(|e| SnapstoreError::Io(e.error))?;

        sink.emit(&EventRecord::now(Event::BlobCopy {
            path: logical.to_string(),
            hash: hash.clone(),
            size: content.len() as u64,
        }));
        Ok(PutOutcome { hash, size: content.len() as u64, reused: false })
    }

    /// Re-hash a stored blob and compare against its name
    ///
    /// # Errors
    ///
    /// - [`SnapstoreError::BlobNotFound`] if no blob exists for `hash`
    pub fn verify_blob(&self, hash: &str) -> Result<bool> {
        if !self.exists(hash) {
            return Err(SnapstoreError::BlobNotFound(hash.to_string()));
        }
        let actual = utils::hash_file_content(&self.path_for(hash))?;
        Ok(actual == hash)
    }

    /// All blob hashes currently stored
    pub fn list_blobs(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        if !self.root.is_dir() {
            return Ok(hashes);
        }
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for blob in fs::read_dir(shard.path())? {
                let blob = blob?;
                let name = blob.file_name().to_string_lossy().into_owned();
                if is_hash(&name) {
                    hashes.push(name);
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Blob count and total size
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for hash in self.list_blobs()? {
            stats.blob_count += 1;
            stats.total_bytes += fs::metadata(self.path_for(&hash))?.len();
        }
        Ok(stats)
    }
}

/// Writer that hashes everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new() }
    }

    /// Hex digest of the bytes written so far
    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Whether `s` looks like a lowercase hex SHA-256 digest
fn is_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
