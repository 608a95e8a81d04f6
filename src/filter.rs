//! Include/exclude filtering of candidate files
//!
//! A [`FilterSpec`] is a set of glob patterns plus a [`PatternMode`]. A file
//! *matches* when any pattern matches either its base name or its full path;
//! `Exclude` mode keeps non-matching files, `Include` mode keeps only
//! matching ones. Patterns use shell glob syntax where `*` also crosses
//! directory separators, so `*.tmp` matches at any depth. On Windows
//! matching ignores case, as the filesystem does.

use crate::error::{Result, SnapstoreError};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How patterns select files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// Process only files matching a pattern
    Include,
    /// Process every file except those matching a pattern
    #[default]
    Exclude,
}

impl FromStr for PatternMode {
    type Err = SnapstoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" => Ok(PatternMode::Include),
            "exclude" => Ok(PatternMode::Exclude),
            _ => Err(SnapstoreError::InvalidPatternMode(s.to_string())),
        }
    }
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternMode::Include => f.write_str("include"),
            PatternMode::Exclude => f.write_str("exclude"),
        }
    }
}

/// Compiled filter specification
#[derive(Debug, Clone)]
pub struct FilterSpec {
    patterns: Vec<String>,
    mode: PatternMode,
    set: GlobSet,
}

impl FilterSpec {
    /// Compile a set of patterns
    ///
    /// # Errors
    ///
    /// - [`SnapstoreError::InvalidPattern`] if a pattern is not a valid glob
    pub fn new<I, S>(patterns: I, mode: PatternMode) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.trim().is_empty())
            .collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = GlobBuilder::new(pattern.trim())
                .case_insensitive(cfg!(windows))
                .build()
                .map_err(|e| SnapstoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.kind().to_string(),
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| SnapstoreError::InvalidPattern {
            pattern: patterns.join(","),
            reason: e.to_string(),
        })?;

        Ok(Self { patterns, mode, set })
    }

    /// Replace the patterns, the mode, or both, keeping whatever is not given
    ///
    /// # Errors
    ///
    /// - [`SnapstoreError::InvalidPattern`] if a new pattern is not a valid glob
    pub fn override_with(&self, patterns: Option<Vec<String>>, mode: Option<PatternMode>) -> Result<Self> {
        Self::new(
            patterns.unwrap_or_else(|| self.patterns.clone()),
            mode.unwrap_or(self.mode),
        )
    }

    /// Exclude filter that lets every file through
    pub fn allow_all() -> Self {
        Self {
            patterns: Vec::new(),
            mode: PatternMode::Exclude,
            set: GlobSet::empty(),
        }
    }

    /// Patterns as given
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Selection mode
    pub fn mode(&self) -> PatternMode {
        self.mode
    }

    /// Whether any pattern matches the file's base name or full path
    pub fn matches(&self, path: &Path) -> bool {
        if self.set.is_empty() {
            return false;
        }
        let by_name = path
            .file_name()
            .map(|name| self.set.is_match(Path::new(name)))
            .unwrap_or(false);
        by_name || self.set.is_match(path)
    }

    /// Whether the file should be backed up under this filter
    pub fn should_process(&self, path: &Path) -> bool {
        let matched = self.matches(path);
        match self.mode {
            PatternMode::Include => matched,
            PatternMode::Exclude => !matched,
        }
    }
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self::allow_all()
    }
}
