//! Backup configuration
//!
//! Two document shapes are accepted and normalized into one
//! [`BackupConfig`]:
//!
//! ```json
//! {
//!   "repository": "D:/backups/repo",
//!   "sources": ["C:/Users/me/Documents"],
//!   "patterns": ["*.tmp", "*.log"],
//!   "pattern_mode": "exclude",
//!   "use_shadow_copy": true,
//!   "max_retries": 3
//! }
//! ```
//!
//! and the legacy shape written by older front-ends, which only knew an
//! exclude list:
//!
//! ```json
//! { "repository": "repo", "sources": ["docs"], "exclude": ["*.tmp"], "use_vss": false }
//! ```
//!
//! Everything is validated at load time. Programmatic callers skip the JSON
//! layer and use [`BackupOptions`] directly.

use crate::error::{Result, SnapstoreError};
use crate::events::EventSink;
use crate::filter::{FilterSpec, PatternMode};
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::utils;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const CURRENT_VERSION: u32 = 2;
const LEGACY_VERSION: u32 = 1;

/// Current configuration document
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigV2 {
    #[serde(default)]
    version: Option<u32>,
    repository: PathBuf,
    sources: Vec<PathBuf>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    pattern_mode: Option<String>,
    #[serde(default)]
    use_shadow_copy: bool,
    #[serde(default)]
    max_retries: Option<i64>,
}

/// Legacy configuration document (exclude list only)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigV1 {
    #[serde(default)]
    version: Option<u32>,
    repository: PathBuf,
    sources: Vec<PathBuf>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    use_vss: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ConfigInput {
    Current(ConfigV2),
    Legacy(ConfigV1),
}

/// Validated backup configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Repository root
    pub repository: PathBuf,
    /// Source roots, each with a distinct base name
    pub sources: Vec<PathBuf>,
    /// Normalized filter
    pub filter: FilterSpec,
    /// Whether to read through shadow copies
    pub use_shadow_copy: bool,
    /// Attempts per file, at least 1
    pub max_retries: u32,
    /// Shape the document was decoded from
    pub version: u32,
}

impl BackupConfig {
    /// Decode and validate a configuration document
    ///
    /// # Errors
    ///
    /// - [`SnapstoreError::InvalidConfiguration`] if the document matches neither shape
    /// - [`SnapstoreError::InvalidPatternMode`] for a mode other than include/exclude
    /// - [`SnapstoreError::InvalidPattern`] for a malformed glob
    /// - [`SnapstoreError::NoSources`] or [`SnapstoreError::DuplicateSourceName`]
    pub fn from_json(json: &str) -> Result<Self> {
        let input: ConfigInput = serde_json::from_str(json).map_err(|e| {
            SnapstoreError::config(format!("unrecognized configuration document: {}", e))
        })?;

        let config = match input {
            ConfigInput::Current(v2) => {
                check_version(v2.version, CURRENT_VERSION)?;
                let mode = match v2.pattern_mode.as_deref() {
                    Some(mode) => mode.parse::<PatternMode>()?,
                    None => PatternMode::default(),
                };
                let max_retries = match v2.max_retries {
                    None => DEFAULT_MAX_ATTEMPTS,
                    Some(n) if n >= 1 => u32::try_from(n).map_err(|_| {
                        SnapstoreError::config(format!("max_retries {} is too large", n))
                    })?,
                    Some(n) => {
                        return Err(SnapstoreError::config(format!(
                            "max_retries must be at least 1, got {}",
                            n
                        )))
                    }
                };
                BackupConfig {
                    repository: v2.repository,
                    sources: v2.sources,
                    filter: FilterSpec::new(v2.patterns, mode)?,
                    use_shadow_copy: v2.use_shadow_copy,
                    max_retries,
                    version: CURRENT_VERSION,
                }
            }
            ConfigInput::Legacy(v1) => {
                check_version(v1.version, LEGACY_VERSION)?;
                BackupConfig {
                    repository: v1.repository,
                    sources: v1.sources,
                    filter: FilterSpec::new(v1.exclude, PatternMode::Exclude)?,
                    use_shadow_copy: v1.use_vss,
                    max_retries: DEFAULT_MAX_ATTEMPTS,
                    version: LEGACY_VERSION,
                }
            }
        };

        validate_sources(&config.sources)?;
        debug!(
            "Loaded v{} configuration: {} sources, {} patterns ({})",
            config.version,
            config.sources.len(),
            config.filter.patterns().len(),
            config.filter.mode()
        );
        Ok(config)
    }

    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Engine options equivalent to this configuration
    pub fn to_options(&self) -> BackupOptions {
        BackupOptions::new(self.sources.clone())
            .filter(self.filter.clone())
            .use_shadow_copy(self.use_shadow_copy)
            .max_retries(self.max_retries)
    }
}

fn check_version(found: Option<u32>, expected: u32) -> Result<()> {
    match found {
        Some(v) if v != expected => Err(SnapstoreError::config(format!(
            "version {} does not match a version {} document",
            v, expected
        ))),
        _ => Ok(()),
    }
}

/// Check a source list: non-empty, every root named, no two names alike
///
/// Names are taken from the resolved roots, so `.` and `dir/sub/..` are
/// named after the directories they point at.
///
/// # Errors
///
/// - [`SnapstoreError::NoSources`] if `sources` is empty
/// - [`SnapstoreError::DuplicateSourceName`] if two roots share a base name
pub fn validate_sources(sources: &[PathBuf]) -> Result<()> {
    if sources.is_empty() {
        return Err(SnapstoreError::NoSources);
    }

    let mut seen: HashMap<String, &PathBuf> = HashMap::new();
    for source in sources {
        let name = utils::root_name(&utils::resolve_source(source)?)?;
        if let Some(first) = seen.get(&name) {
            return Err(SnapstoreError::DuplicateSourceName {
                name,
                first: (*first).clone(),
                second: source.clone(),
            });
        }
        seen.insert(name, source);
    }
    Ok(())
}

/// Per-file fault injection used by tests
#[doc(hidden)]
pub type FailureHook = Arc<dyn Fn(&Path, u32) -> Result<()> + Send + Sync>;

/// Options for a backup run
///
/// # Examples
///
/// ```rust
/// use snapstore::config::BackupOptions;
/// use snapstore::filter::{FilterSpec, PatternMode};
///
/// # fn example() -> snapstore::Result<()> {
/// let options = BackupOptions::new(vec!["/data/docs".into()])
///     .filter(FilterSpec::new(["*.log"], PatternMode::Exclude)?)
///     .max_retries(5);
/// assert_eq!(options.retry_policy().max_attempts(), 5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BackupOptions {
    pub(crate) sources: Vec<PathBuf>,
    pub(crate) filter: FilterSpec,
    pub(crate) use_shadow_copy: bool,
    pub(crate) max_retries: u32,
    pub(crate) backoff_unit: Duration,
    pub(crate) sink: Option<Arc<dyn EventSink>>,
    pub(crate) failure_hook: Option<FailureHook>,
}

impl fmt::Debug for BackupOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupOptions")
            .field("sources", &self.sources)
            .field("filter", &self.filter)
            .field("use_shadow_copy", &self.use_shadow_copy)
            .field("max_retries", &self.max_retries)
            .field("backoff_unit", &self.backoff_unit)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl BackupOptions {
    /// Options backing up `sources` with every file included
    pub fn new(sources: Vec<PathBuf>) -> Self {
        Self {
            sources,
            filter: FilterSpec::allow_all(),
            use_shadow_copy: false,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
            sink: None,
            failure_hook: None,
        }
    }

    /// Set the file filter
    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    /// Request shadow copies
    pub fn use_shadow_copy(mut self, enabled: bool) -> Self {
        self.use_shadow_copy = enabled;
        self
    }

    /// Attempts per file (values below 1 count as 1)
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts;
        self
    }

    /// Unit of the retry back-off schedule
    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Receive engine events
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[doc(hidden)]
    pub fn failure_hook(mut self, hook: FailureHook) -> Self {
        self.failure_hook = Some(hook);
        self
    }

    /// Source roots
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Filter applied to every file
    pub fn filter_spec(&self) -> &FilterSpec {
        &self.filter
    }

    /// Whether shadow copies were requested
    pub fn shadow_copy_requested(&self) -> bool {
        self.use_shadow_copy
    }

    /// The retry policy these options describe
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries).with_backoff_unit(self.backoff_unit)
    }
}
