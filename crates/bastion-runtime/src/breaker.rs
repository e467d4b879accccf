//! Circuit breaker
//!
//! Counts classifier violations per session and trips after a
//! profile-specific threshold. A tripped breaker only disables the fast-path
//! classifier; the permission validator is never affected.
//!
//! Every authorization call runs in a fresh process, so the state lives on
//! disk: one small JSON file per session, updated under an advisory lock and
//! replaced atomically (temp file + rename).

use bastion_config::Profile;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

/// State files larger than this are treated as corrupt
const MAX_STATE_BYTES: u64 = 4096;

/// Lock attempts before giving up
const LOCK_ATTEMPTS: u32 = 3;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Longest session id accepted
pub const MAX_SESSION_ID_LEN: usize = 100;

/// Session ids up to this length made of safe characters are used verbatim
const VERBATIM_ID_LEN: usize = 64;

/// Circuit breaker errors
#[derive(Error, Debug)]
pub enum BreakerError {
    #[error("Circuit breaker state for session '{0}' is locked by another process")]
    Unavailable(String),

    #[error("Circuit breaker I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid session id: {0}")]
    InvalidSession(String),
}

/// Persisted breaker state for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub session_id: String,
    pub violation_count: u32,
    pub threshold: u32,
    pub tripped: bool,
}

impl CircuitBreakerState {
    /// Fresh state for a session
    pub fn new(session_id: impl Into<String>, threshold: u32) -> Self {
        Self {
            session_id: session_id.into(),
            violation_count: 0,
            threshold,
            tripped: false,
        }
    }
}

/// Violation threshold for a profile
pub fn threshold_for(profile: Profile) -> u32 {
    match profile {
        Profile::Development => 10,
        Profile::Testing => 5,
        Profile::Production => 3,
    }
}

/// File-backed circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state_dir: PathBuf,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(state_dir: impl Into<PathBuf>, threshold: u32) -> Self {
        Self {
            state_dir: state_dir.into(),
            threshold: threshold.max(1),
        }
    }

    /// Breaker using the threshold for a profile
    pub fn for_profile(state_dir: impl Into<PathBuf>, profile: Profile) -> Self {
        Self::new(state_dir, threshold_for(profile))
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Current state of a session (fresh if none is recorded)
    ///
    /// Reads without locking; writers replace the file atomically.
    pub fn state(&self, session_id: &str) -> Result<CircuitBreakerState, BreakerError> {
        let path = self.state_path(session_id)?;
        Ok(self.read_state(&path, session_id))
    }

    /// Record one violation and return the updated state
    ///
    /// Trips the breaker once `violation_count` reaches the threshold. A
    /// tripped breaker stays tripped until `reset`.
    pub fn record_violation(&self, session_id: &str) -> Result<CircuitBreakerState, BreakerError> {
        let path = self.state_path(session_id)?;
        fs::create_dir_all(&self.state_dir)?;

        let _lock = self.lock(&path, session_id)?;

        let mut state = self.read_state(&path, session_id);
        let was_tripped = state.tripped;
        state.violation_count = state.violation_count.saturating_add(1);
        if state.violation_count >= state.threshold {
            state.tripped = true;
        }
        self.write_state(&path, &state)?;

        if state.tripped && !was_tripped {
            tracing::warn!(
                session = session_id,
                violations = state.violation_count,
                "circuit breaker tripped, fast path disabled for this session"
            );
        }

        Ok(state)
    }

    /// Clear a session's state; used only when a new session begins
    pub fn reset(&self, session_id: &str) -> Result<(), BreakerError> {
        let path = self.state_path(session_id)?;
        if !self.state_dir.exists() {
            return Ok(());
        }

        let _lock = self.lock(&path, session_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn state_path(&self, session_id: &str) -> Result<PathBuf, BreakerError> {
        Ok(self.state_dir.join(state_file_name(session_id)?))
    }

    /// Read state, resetting to a fresh state when the file is unusable
    fn read_state(&self, path: &Path, session_id: &str) -> CircuitBreakerState {
        let fresh = CircuitBreakerState::new(session_id, self.threshold);

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return fresh,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable circuit breaker state, resetting");
                return fresh;
            }
        };
        if size > MAX_STATE_BYTES {
            tracing::warn!(path = %path.display(), size, "oversized circuit breaker state, resetting");
            return fresh;
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<CircuitBreakerState>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(mut state) if state.session_id == session_id => {
                state.threshold = self.threshold;
                state.tripped = state.tripped || state.violation_count >= self.threshold;
                state
            }
            Ok(_) => {
                tracing::warn!(path = %path.display(), "circuit breaker state belongs to another session, resetting");
                fresh
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt circuit breaker state, resetting");
                fresh
            }
        }
    }

    fn write_state(&self, path: &Path, state: &CircuitBreakerState) -> Result<(), BreakerError> {
        let json = serde_json::to_string(state).map_err(io::Error::other)?;

        let mut tmp = NamedTempFile::new_in(&self.state_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Take the sidecar lock with a bounded number of attempts
    fn lock(&self, path: &Path, session_id: &str) -> Result<File, BreakerError> {
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        for attempt in 1..=LOCK_ATTEMPTS {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "circuit breaker lock busy");
                    if attempt < LOCK_ATTEMPTS {
                        thread::sleep(LOCK_RETRY_DELAY);
                    }
                }
            }
        }

        Err(BreakerError::Unavailable(session_id.to_string()))
    }
}

/// Map a session id to a state file name
///
/// Short ids of `[A-Za-z0-9_-]` are used verbatim; anything else is hex
/// encoded. The two forms use distinct prefixes so the mapping is injective.
fn state_file_name(session_id: &str) -> Result<String, BreakerError> {
    if session_id.is_empty() {
        return Err(BreakerError::InvalidSession("session id is empty".to_string()));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(BreakerError::InvalidSession(format!(
            "session id exceeds {} bytes",
            MAX_SESSION_ID_LEN
        )));
    }

    let verbatim = session_id.len() <= VERBATIM_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if verbatim {
        Ok(format!("breaker-s-{}.json", session_id))
    } else {
        let hex: String = session_id.bytes().map(|b| format!("{:02x}", b)).collect();
        Ok(format!("breaker-h-{}.json", hex))
    }
}
