//! Audit logging
//!
//! Every completed decision is written as one JSON line. Logging never
//! fails the caller: write errors are retried once and then reported
//! through `tracing` only.

use bastion_config::Profile;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;

/// Rotate once the active log reaches this size
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated files kept (`audit.jsonl.1` .. `audit.jsonl.5`)
pub const DEFAULT_BACKUPS: usize = 5;

/// What kind of decision an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FsRead,
    FsWrite,
    ShellExecute,
    NetworkAccess,
    EnvAccess,
    Classify,
    CircuitBreakerTripped,
    SessionReset,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::FsRead => "fs_read",
            EventType::FsWrite => "fs_write",
            EventType::ShellExecute => "shell_execute",
            EventType::NetworkAccess => "network_access",
            EventType::EnvAccess => "env_access",
            EventType::Classify => "classify",
            EventType::CircuitBreakerTripped => "circuit_breaker_tripped",
            EventType::SessionReset => "session_reset",
        };
        f.write_str(name)
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Final decision or classifier verdict
    pub decision: String,
    /// Redacted description of what was requested
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn new(
        event_type: EventType,
        decision: impl fmt::Display,
        subject: impl Into<String>,
        profile: Profile,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            decision: decision.to_string(),
            subject: subject.into(),
            reason: None,
            profile,
            agent: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<impl Into<String>>) -> Self {
        self.reason = reason.map(Into::into);
        self
    }

    pub fn with_agent(mut self, agent: Option<&str>) -> Self {
        self.agent = agent.map(str::to_string);
        self
    }

    /// Format as a single JSON line (without the trailing newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Shell commands are recorded as program name plus argument count
///
/// Leading `NAME=value` assignments are dropped since they commonly carry
/// secrets.
pub fn redact_command(command: &str) -> String {
    let mut tokens = command.split_whitespace().skip_while(|t| t.contains('='));
    match tokens.next() {
        Some(program) => format!("{} [{} args]", program, tokens.count()),
        None => "<empty command>".to_string(),
    }
}

/// URLs are recorded as scheme and host only
pub fn redact_url(raw: &str) -> String {
    let raw = raw.trim();
    let parsed = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{}", raw))
    };
    match parsed {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{}://{}", url.scheme(), host),
            None => format!("{}:", url.scheme()),
        },
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Audit logger backend
pub trait AuditLogger: Send + Sync {
    /// Record an entry; must not panic or report failure to the caller
    fn log(&self, entry: AuditEntry);

    /// Entries recorded so far, where the backend can provide them
    fn entries(&self) -> Vec<AuditEntry> {
        Vec::new()
    }
}

/// Append-only JSONL file with size-based rotation
#[derive(Debug, Clone)]
pub struct JsonlAuditLogger {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
}

impl JsonlAuditLogger {
    /// Logger with the default 10 MiB / 5 backup rotation
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_rotation(path, DEFAULT_MAX_BYTES, DEFAULT_BACKUPS)
    }

    pub fn with_rotation(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            backups,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the n-th rotated file
    pub fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per entry so concurrent appenders never interleave lines
        file.write_all(format!("{}\n", line).as_bytes())
    }

    fn rotate_if_needed(&self) -> io::Result<()> {
        if !self.over_limit() {
            return Ok(());
        }

        let mut lock_name = self.path.as_os_str().to_os_string();
        lock_name.push(".lock");
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(PathBuf::from(lock_name))?;

        // Another process rotating right now is as good as rotating here
        if FileExt::try_lock_exclusive(&lock).is_err() {
            return Ok(());
        }

        // Re-check under the lock; a concurrent writer may have rotated already
        if self.over_limit() {
            self.rotate()?;
        }
        FileExt::unlock(&lock)
    }

    fn over_limit(&self) -> bool {
        fs::metadata(&self.path)
            .map(|meta| meta.len() >= self.max_bytes)
            .unwrap_or(false)
    }

    fn rotate(&self) -> io::Result<()> {
        if self.backups == 0 {
            return remove_if_exists(&self.path);
        }

        remove_if_exists(&self.backup_path(self.backups))?;
        for n in (1..self.backups).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl AuditLogger for JsonlAuditLogger {
    fn log(&self, entry: AuditEntry) {
        let line = match entry.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize audit entry");
                return;
            }
        };

        if let Err(first) = self.append(&line) {
            tracing::debug!(error = %first, "audit write failed, retrying once");
            if let Err(e) = self.append(&line) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    entry = %line,
                    "audit log unwritable, entry reported here instead"
                );
            }
        }
    }

    /// Entries in the active file; rotated files are not read
    fn entries(&self) -> Vec<AuditEntry> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }
}

/// In-memory audit logger
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLogger {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

/// No-op audit logger
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditLogger;

impl NullAuditLogger {
    pub fn new() -> Self {
        Self
    }
}

impl AuditLogger for NullAuditLogger {
    fn log(&self, _entry: AuditEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(subject: &str) -> AuditEntry {
        AuditEntry::new(EventType::FsRead, "ALLOW", subject, Profile::Development)
    }

    #[test]
    fn test_entry_serializes_rfc3339() {
        let line = entry("src/a.py")
            .with_reason(Some("matched rule 'src/**'"))
            .to_json_line()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["event_type"], "fs_read");
        assert_eq!(value["profile"], "development");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
        assert!(value.get("agent").is_none());
    }

    #[test]
    fn test_redact_command() {
        assert_eq!(redact_command("git commit -m 'secret msg'"), "git [4 args]");
        assert_eq!(redact_command("TOKEN=abc123 curl https://x"), "curl [1 args]");
        assert_eq!(redact_command("  "), "<empty command>");
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://user:pw@api.example.com/v1?key=secret"),
            "https://api.example.com"
        );
        assert_eq!(redact_url("pypi.org/simple"), "https://pypi.org");
    }

    #[test]
    fn test_memory_logger_stores_and_clears() {
        let logger = MemoryAuditLogger::new();
        logger.log(entry("a"));
        logger.log(entry("b"));
        assert_eq!(logger.entries().len(), 2);

        logger.clear();
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_null_logger_no_op() {
        let logger = NullAuditLogger::new();
        logger.log(entry("a"));
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_jsonl_appends_lines() {
        let temp = TempDir::new().unwrap();
        let logger = JsonlAuditLogger::new(temp.path().join("logs/audit.jsonl"));

        logger.log(entry("one"));
        logger.log(entry("two"));

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].subject, "two");
    }

    #[test]
    fn test_backup_path_naming() {
        let logger = JsonlAuditLogger::new("/var/log/bastion/audit.jsonl");
        assert_eq!(
            logger.backup_path(3),
            PathBuf::from("/var/log/bastion/audit.jsonl.3")
        );
    }
}
