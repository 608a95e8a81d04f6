//! Bounded retry of per-file work
//!
//! Every file of a backup run is hashed, stored and materialized under a
//! [`RetryPolicy`]. A failing attempt emits an `error` event carrying the
//! attempt number; when attempts remain the policy sleeps
//! `min(5 × attempt, 30)` back-off units (seconds by default) and tries
//! again. After the last attempt a final `error` event is emitted and the
//! caller moves on: one file's permanent failure never aborts the run.

use crate::error::{Result, SnapstoreError};
use crate::events::{Event, EventRecord, EventSink};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default number of attempts per file
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const BACKOFF_STEP: u32 = 5;
const BACKOFF_CAP: u32 = 30;

/// Bounded-retry wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Policy making up to `max_attempts` attempts (at least one)
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Scale the back-off; `Duration::ZERO` disables sleeping
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep taken after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let units = BACKOFF_STEP.saturating_mul(attempt).min(BACKOFF_CAP);
        self.backoff_unit * units
    }

    /// Run `action` until it succeeds or attempts run out
    ///
    /// `action` receives the 1-based attempt number. `path` labels the
    /// emitted events.
    ///
    /// # Errors
    ///
    /// - [`SnapstoreError::RetryExhausted`] once every attempt has failed
    pub fn run<T, F>(&self, path: &Path, sink: &dyn EventSink, mut action: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        for attempt in 1..=self.max_attempts {
            match action(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let is_final = attempt == self.max_attempts;
                    warn!(
                        "{:?}: attempt {}/{} failed: {}",
                        path, attempt, self.max_attempts, e
                    );
                    sink.emit(&EventRecord::now(Event::Error {
                        path: path.to_path_buf(),
                        attempt,
                        max_attempts: self.max_attempts,
                        message: e.to_string(),
                        is_final,
                    }));
                    if !is_final {
                        let delay = self.delay_for(attempt);
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
        }

        Err(SnapstoreError::RetryExhausted {
            path: path.to_path_buf(),
            attempts: self.max_attempts,
        })
    }
}
