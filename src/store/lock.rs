use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const LOCK_FILE_NAME: &str = "sports-tally.lock";

/// Lock re-validation is throttled: a passing check is trusted for this long
/// before the lock file is actually re-read.
pub const LOCK_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Advisory lock over a store root.
///
/// Cooperative only: correctness depends on every writer honoring the lock
/// file. The token identifies this process instance so a lock file written by
/// someone else (or deleted under us) is detected as `LockLost`.
#[derive(Debug)]
pub struct StoreLock {
    lock_file: PathBuf,
    token: String,
    interval: Duration,
    state: Mutex<CheckState>,
}

#[derive(Debug, Default)]
struct CheckState {
    last_check: Option<Instant>,
    last_result: bool,
}

impl StoreLock {
    pub fn new(store_root: &Path) -> Self {
        Self::with_interval(store_root, LOCK_CHECK_INTERVAL)
    }

    /// Lock with a custom throttle interval (`Duration::ZERO` re-reads the
    /// lock file on every check).
    pub fn with_interval(store_root: &Path, interval: Duration) -> Self {
        StoreLock {
            lock_file: store_root.join(LOCK_FILE_NAME),
            token: format!("{}\npid {}", Uuid::new_v4(), std::process::id()),
            interval,
            state: Mutex::new(CheckState::default()),
        }
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Take the lock if nobody holds it, then verify we hold it.
    pub fn acquire(&self) -> Result<()> {
        if !self.lock_file.exists() {
            fs::write(&self.lock_file, &self.token)?;
        }
        self.check(true)?;
        Ok(())
    }

    /// Re-validate the lock, at most once per throttle interval.
    ///
    /// With `raise_on_fail` a failed (or cached-failed) check returns
    /// `Error::LockLost`; otherwise it returns `Ok(false)`.
    pub fn check(&self, raise_on_fail: bool) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let due = state
            .last_check
            .map_or(true, |at| at.elapsed() >= self.interval);
        if due {
            state.last_result = self.verify()?;
            state.last_check = Some(Instant::now());
        }
        if !state.last_result && raise_on_fail {
            return Err(Error::LockLost {
                reason: lock_failure_reason(&self.lock_file),
            });
        }
        Ok(state.last_result)
    }

    fn verify(&self) -> Result<bool> {
        match fs::read_to_string(&self.lock_file) {
            Ok(contents) => Ok(contents == self.token),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the lock if we own it. Returns whether the file was removed.
    pub fn release(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.last_check = None;
        state.last_result = false;
        if self.verify()? {
            fs::remove_file(&self.lock_file)?;
            return Ok(true);
        }
        Ok(false)
    }
}

fn lock_failure_reason(lock_file: &Path) -> String {
    if lock_file.exists() {
        format!("store in use by another process ({})", lock_file.display())
    } else {
        format!("lock file missing ({})", lock_file.display())
    }
}
