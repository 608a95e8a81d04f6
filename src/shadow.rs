//! Shadow-copy context for consistent reads of in-use files
//!
//! When requested, the backup run snapshots every volume holding a source
//! before scanning, exposes each shadow volume under a spare drive letter and
//! reads through that alias instead of the live filesystem. The facility is
//! Windows-only; everywhere else (and whenever a check fails) the context
//! stays [`ShadowState::Disabled`] and the run proceeds against live files.
//!
//! ## State machine
//!
//! ```text
//! Disabled ──(requested)──▶ Probing ──(created)──▶ Active ──(release)──▶ Released
//!                              │
//!                              └──(any failure)──▶ Disabled
//! ```
//!
//! Release happens exactly once, either explicitly through
//! [`ShadowCopyContext::release`] or when the context is dropped, so an
//! aborted scan still cleans its shadows up. Release failures are logged and
//! swallowed.
//!
//! The OS work sits behind [`ShadowProvider`]. [`native_provider`] picks the
//! implementation once for the platform; tests inject their own through
//! [`ShadowCopyContext::with_provider`].

use crate::error::{Result, SnapstoreError};
use crate::events::{Event, EventRecord, EventSink};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Lifecycle of a [`ShadowCopyContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    /// Reads go to the live filesystem
    Disabled,
    /// Checks and shadow creation in progress
    Probing,
    /// Reads go through shadow aliases
    Active,
    /// Shadows were torn down
    Released,
}

impl fmt::Display for ShadowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShadowState::Disabled => "disabled",
            ShadowState::Probing => "probing",
            ShadowState::Active => "active",
            ShadowState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Platform facility that creates and removes volume shadow copies
///
/// Volumes and aliases are drive specifiers such as `"C:"`.
pub trait ShadowProvider: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Fail unless the process may create shadow copies
    fn check_privileges(&self) -> Result<()>;

    /// Shadow `volumes` in one request and expose each under an unused drive
    ///
    /// Returns the volume to alias mapping. `scratch` is a private directory
    /// for scripts and metadata, removed after release. A failed request
    /// deletes whatever shadows it already made.
    fn create(&mut self, volumes: &[String], scratch: &Path) -> Result<BTreeMap<String, String>>;

    /// Delete the shadows behind `aliases` and any left by a partial `create`
    fn release(&mut self, aliases: &[String], scratch: &Path) -> Result<()>;
}

/// Provider for platforms without a shadow-copy facility
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProvider;

impl ShadowProvider for UnsupportedProvider {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn check_privileges(&self) -> Result<()> {
        Err(SnapstoreError::ShadowCopyUnavailable(
            "shadow copies are not supported on this platform".to_string(),
        ))
    }

    fn create(&mut self, _volumes: &[String], _scratch: &Path) -> Result<BTreeMap<String, String>> {
        Err(SnapstoreError::ShadowCopyUnavailable(
            "shadow copies are not supported on this platform".to_string(),
        ))
    }

    fn release(&mut self, _aliases: &[String], _scratch: &Path) -> Result<()> {
        Ok(())
    }
}

/// The shadow-copy provider for the running platform
pub fn native_provider() -> Box<dyn ShadowProvider> {
    #[cfg(windows)]
    {
        Box::new(diskshadow::DiskShadowProvider::new())
    }

    #[cfg(not(windows))]
    {
        Box::new(UnsupportedProvider)
    }
}

/// Drive specifier (`"C:"`) of an absolute drive-letter path
///
/// Verbatim prefixes (`\\?\C:\...`) are understood. UNC shares and paths
/// without a drive letter yield `None`.
pub fn drive_of(path: &Path) -> Option<String> {
    let text = path.to_string_lossy();
    let rest = strip_verbatim(&text);
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
            Some(format!("{}:", letter.to_ascii_uppercase()))
        }
        _ => None,
    }
}

fn strip_verbatim(text: &str) -> &str {
    match text.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC\\") => rest,
        _ => text,
    }
}

/// Shadow-copy state for one backup run
pub struct ShadowCopyContext {
    state: ShadowState,
    provider: Option<Box<dyn ShadowProvider>>,
    mapping: BTreeMap<String, String>,
    scratch: Option<TempDir>,
}

impl fmt::Debug for ShadowCopyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowCopyContext")
            .field("state", &self.state)
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("mapping", &self.mapping)
            .finish()
    }
}

impl ShadowCopyContext {
    /// A context that never shadows anything
    pub fn disabled() -> Self {
        Self {
            state: ShadowState::Disabled,
            provider: None,
            mapping: BTreeMap::new(),
            scratch: None,
        }
    }

    /// Enter the context with the platform's native provider
    ///
    /// Returns a disabled context right away when `requested` is false.
    pub fn open(requested: bool, sources: &[PathBuf], sink: &dyn EventSink) -> Self {
        if !requested {
            return Self::disabled();
        }
        Self::with_provider(native_provider(), sources, sink)
    }

    /// Enter the context with an explicit provider
    ///
    /// Never fails: every problem degrades to [`ShadowState::Disabled`] with
    /// a `shadow_copy_unavailable` event.
    pub fn with_provider(
        provider: Box<dyn ShadowProvider>,
        sources: &[PathBuf],
        sink: &dyn EventSink,
    ) -> Self {
        let mut context = Self {
            state: ShadowState::Probing,
            provider: Some(provider),
            mapping: BTreeMap::new(),
            scratch: None,
        };

        match context.probe(sources) {
            Ok(volumes) => {
                info!("Shadow copies active for {}", volumes.join(", "));
                sink.emit(&EventRecord::now(Event::ShadowCopyActive { volumes }));
            }
            Err(e) => {
                let reason = match e {
                    SnapstoreError::ShadowCopyUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                warn!("Shadow copy unavailable, reading live files: {}", reason);
                context.state = ShadowState::Disabled;
                context.provider = None;
                sink.emit(&EventRecord::now(Event::ShadowCopyUnavailable { reason }));
            }
        }

        context
    }

    fn probe(&mut self, sources: &[PathBuf]) -> Result<Vec<String>> {
        let Some(provider) = self.provider.as_mut() else {
            return Err(SnapstoreError::internal("Shadow context has no provider"));
        };
        provider.check_privileges()?;

        let mut volumes: Vec<String> = Vec::new();
        for source in sources {
            let drive = drive_of(source).ok_or_else(|| {
                SnapstoreError::ShadowCopyUnavailable(format!(
                    "{} is not on a local drive-letter volume",
                    source.display()
                ))
            })?;
            if !volumes.contains(&drive) {
                volumes.push(drive);
            }
        }
        if volumes.is_empty() {
            return Err(SnapstoreError::ShadowCopyUnavailable("no source volumes".to_string()));
        }

        let scratch = tempfile::Builder::new().prefix("snapstore-shadow-").tempdir()?;
        debug!("Creating shadows of {:?} via {}", volumes, provider.name());
        match provider.create(&volumes, scratch.path()) {
            Ok(mapping) => {
                if let Some(missing) = volumes.iter().find(|v| !mapping.contains_key(*v)) {
                    let aliases: Vec<String> = mapping.values().cloned().collect();
                    if let Err(e) = provider.release(&aliases, scratch.path()) {
                        warn!("Cleanup after incomplete shadow creation failed: {}", e);
                    }
                    return Err(SnapstoreError::ShadowCopyUnavailable(format!(
                        "no alias drive exposed for {}",
                        missing
                    )));
                }
                self.mapping = mapping;
                self.scratch = Some(scratch);
                self.state = ShadowState::Active;
                Ok(volumes)
            }
            Err(e) => {
                // A failed request may still have left shadows behind.
                if let Err(cleanup) = provider.release(&[], scratch.path()) {
                    warn!("Cleanup after failed shadow creation failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Current state
    pub fn state(&self) -> ShadowState {
        self.state
    }

    /// Whether reads are being redirected
    pub fn is_active(&self) -> bool {
        self.state == ShadowState::Active
    }

    /// Volume to alias-drive mapping while active
    pub fn mapping(&self) -> &BTreeMap<String, String> {
        &self.mapping
    }

    /// Rewrite `path` onto its shadow alias
    ///
    /// Paths are returned unchanged unless the context is active and the
    /// path's drive has an alias.
    pub fn map_path(&self, path: &Path) -> PathBuf {
        if !self.is_active() {
            return path.to_path_buf();
        }
        let Some(drive) = drive_of(path) else {
            return path.to_path_buf();
        };
        let Some(alias) = self.mapping.get(&drive) else {
            return path.to_path_buf();
        };

        let text = path.to_string_lossy();
        let rest = &strip_verbatim(&text)[drive.len()..];
        PathBuf::from(format!("{}{}", alias, rest))
    }

    /// Tear the shadows down
    ///
    /// Idempotent. Errors are logged, never returned, and the scratch
    /// directory is always removed.
    pub fn release(&mut self) {
        if self.state != ShadowState::Active {
            return;
        }

        let aliases: Vec<String> = self.mapping.values().cloned().collect();
        if let (Some(provider), Some(scratch)) = (self.provider.as_mut(), self.scratch.as_ref()) {
            match provider.release(&aliases, scratch.path()) {
                Ok(()) => info!("Released shadow copies ({})", aliases.join(", ")),
                Err(e) => warn!("Shadow copy release failed: {}", e),
            }
        }

        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!("Could not remove shadow scratch directory {:?}: {}", path, e);
                let _ = std::fs::remove_dir_all(&path);
            }
        }

        self.mapping.clear();
        self.state = ShadowState::Released;
    }
}

impl Drop for ShadowCopyContext {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(any(windows, test))]
#[cfg_attr(not(windows), allow(dead_code))]
mod diskshadow {
    use super::*;
    use std::fs;
    use std::process::{Command, Output};

    const ALIAS_LETTERS: &str = "ZYXWVUTSRQPONMLKJIHGFED";

    /// Shadow copies through the `diskshadow` scripting tool
    ///
    /// All volumes go into one persistent shadow set. Its id is read from
    /// diskshadow's output as soon as the set exists; from then on a failed
    /// `create` and every `release` delete the whole set.
    #[derive(Debug, Default)]
    pub struct DiskShadowProvider {
        shadow_set: Option<String>,
    }

    impl DiskShadowProvider {
        pub fn new() -> Self {
            Self::default()
        }

        fn try_create(&mut self, volumes: &[String], scratch: &Path) -> Result<BTreeMap<String, String>> {
            let letters = unused_letters(volumes.len());
            if letters.len() < volumes.len() {
                return Err(SnapstoreError::ShadowCopyUnavailable(
                    "not enough unused drive letters for shadow aliases".to_string(),
                ));
            }

            let script = creation_script(volumes, &scratch.join("backup.cab"));
            let output = run_script(scratch, "create.dsh", &script)?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            self.shadow_set = parse_shadow_set(&stdout);
            if !output.status.success() {
                return Err(failure("diskshadow", &output));
            }
            if self.shadow_set.is_none() {
                return Err(SnapstoreError::ShadowCopyUnavailable(
                    "diskshadow did not report a shadow set".to_string(),
                ));
            }

            let mut script = String::new();
            let mut mapping = BTreeMap::new();
            for (i, (volume, letter)) in volumes.iter().zip(&letters).enumerate() {
                let id = parse_shadow_id(&stdout, &format!("snap{}", i)).ok_or_else(|| {
                    SnapstoreError::ShadowCopyUnavailable(format!("no shadow id reported for {}", volume))
                })?;
                script.push_str(&format!("expose {} {}\n", id, letter));
                mapping.insert(volume.clone(), letter.clone());
            }
            let output = run_script(scratch, "expose.dsh", &script)?;
            if !output.status.success() {
                return Err(failure("diskshadow", &output));
            }
            Ok(mapping)
        }

        fn delete_set(&mut self, scratch: &Path) -> Result<()> {
            let Some(set) = self.shadow_set.take() else {
                return Ok(());
            };
            let output = run_script(scratch, "delete.dsh", &format!("delete shadows set {}\n", set))?;
            if output.status.success() {
                debug!("Deleted shadow set {}", set);
                Ok(())
            } else {
                self.shadow_set = Some(set);
                Err(failure("diskshadow", &output))
            }
        }
    }

    /// Script creating one persistent set holding every volume
    pub(super) fn creation_script(volumes: &[String], metadata: &Path) -> String {
        let mut script = String::from("set context persistent nowriters\n");
        script.push_str(&format!("set metadata {}\n", metadata.display()));
        script.push_str("begin backup\n");
        for (i, volume) in volumes.iter().enumerate() {
            script.push_str(&format!("add volume {} alias snap{}\n", volume, i));
        }
        script.push_str("create\nend backup\n");
        script
    }

    /// Shadow set id announced through the `VSS_SHADOW_SET` alias
    pub(super) fn parse_shadow_set(stdout: &str) -> Option<String> {
        stdout
            .lines()
            .find(|line| line.contains("VSS_SHADOW_SET"))
            .and_then(braced_id)
    }

    /// Shadow id announced for `alias`
    pub(super) fn parse_shadow_id(stdout: &str, alias: &str) -> Option<String> {
        let prefix = format!("Alias {} for", alias);
        stdout
            .lines()
            .find(|line| line.trim_start().starts_with(&prefix))
            .and_then(braced_id)
    }

    fn braced_id(line: &str) -> Option<String> {
        let start = line.find('{')?;
        let end = start + line[start..].find('}')?;
        Some(line[start..=end].to_string())
    }

    fn failure(program: &str, output: &Output) -> SnapstoreError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        SnapstoreError::ShadowCopyUnavailable(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            detail.trim()
        ))
    }

    fn run(cmd: &mut Command) -> Result<Output> {
        let output = cmd.output()?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(failure(&cmd.get_program().to_string_lossy(), &output))
        }
    }

    /// Run a diskshadow script, returning its output whatever the exit status
    fn run_script(scratch: &Path, name: &str, script: &str) -> Result<Output> {
        let path = scratch.join(name);
        fs::write(&path, script)?;
        Ok(Command::new("diskshadow").arg("/s").arg(&path).output()?)
    }

    fn unused_letters(count: usize) -> Vec<String> {
        ALIAS_LETTERS
            .chars()
            .map(|c| format!("{}:", c))
            .filter(|drive| !Path::new(&format!("{}\\", drive)).exists())
            .take(count)
            .collect()
    }

    impl ShadowProvider for DiskShadowProvider {
        fn name(&self) -> &str {
            "diskshadow"
        }

        fn check_privileges(&self) -> Result<()> {
            run(Command::new("net").arg("session"))
                .map(|_| ())
                .map_err(|_| {
                    SnapstoreError::ShadowCopyUnavailable(
                        "administrator privileges are required".to_string(),
                    )
                })
        }

        fn create(&mut self, volumes: &[String], scratch: &Path) -> Result<BTreeMap<String, String>> {
            let result = self.try_create(volumes, scratch);
            if result.is_err() {
                if let Err(e) = self.delete_set(scratch) {
                    warn!("Could not delete shadows left by a failed create: {}", e);
                }
            }
            result
        }

        fn release(&mut self, aliases: &[String], scratch: &Path) -> Result<()> {
            if self.shadow_set.is_some() {
                return self.delete_set(scratch);
            }
            if aliases.is_empty() {
                return Ok(());
            }
            let mut script = String::new();
            for alias in aliases {
                script.push_str(&format!("delete shadows exposed {}\n", alias));
            }
            let output = run_script(scratch, "release.dsh", &script)?;
            if output.status.success() {
                Ok(())
            } else {
                Err(failure("diskshadow", &output))
            }
        }
    }

}
