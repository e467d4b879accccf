//! Policy Store
//!
//! Loads, saves, and resolves security policy files.

use crate::lint::{has_errors, lint, Issue};
use crate::policy::{Profile, SecurityPolicy};
use crate::{PolicyError, PolicyResult};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory holding per-project Bastion files
pub const PROJECT_DIR: &str = ".bastion";

/// Policy file name inside the project directory
pub const POLICY_FILE: &str = "policy.json";

/// Where a resolved policy came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Policy file named by the caller, bypassing resolution
    Explicit(PathBuf),
    /// `<project>/.bastion/policy.json`
    Project(PathBuf),
    /// Default policy supplied by the caller
    Default(PathBuf),
    /// Built-in conservative policy
    Builtin,
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::Explicit(path) => write!(f, "explicit ({})", path.display()),
            PolicySource::Project(path) => write!(f, "project ({})", path.display()),
            PolicySource::Default(path) => write!(f, "default ({})", path.display()),
            PolicySource::Builtin => f.write_str("builtin"),
        }
    }
}

/// A loaded policy together with its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub policy: SecurityPolicy,
    pub source: PolicySource,
}

/// Policy store
///
/// Resolves the active policy with the following precedence:
/// 1. Project override (`<root>/.bastion/policy.json`) - highest priority
/// 2. Default policy path, if one was configured
/// 3. Built-in policy - lowest priority
///
/// Sources are not merged; the first one that exists is used as a whole.
/// An explicit policy path replaces the whole chain.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    default_path: Option<PathBuf>,
    explicit_path: Option<PathBuf>,
}

impl PolicyStore {
    /// Create a store with no default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that falls back to a bundled/system default policy
    pub fn with_default(path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: Some(path.into()),
            explicit_path: None,
        }
    }

    /// Use exactly this policy file; it must exist
    pub fn explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// The configured default policy path
    pub fn default_path(&self) -> Option<&Path> {
        self.default_path.as_deref()
    }

    /// Path of the project override file for a project root
    pub fn project_policy_path(root: &Path) -> PathBuf {
        root.join(PROJECT_DIR).join(POLICY_FILE)
    }

    /// Load and validate a policy file
    pub fn load(path: &Path) -> PolicyResult<SecurityPolicy> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PolicyError::NotFound(path.to_path_buf())
            } else {
                PolicyError::IoError(e)
            }
        })?;

        Self::parse(&content, path)
    }

    /// Parse and validate policy JSON; `file` is used for error messages only
    pub fn parse(content: &str, file: &Path) -> PolicyResult<SecurityPolicy> {
        let value: Value =
            serde_json::from_str(content).map_err(|error| PolicyError::JsonParseError {
                file: file.to_path_buf(),
                error,
            })?;

        check_required(&value, file)?;

        let policy: SecurityPolicy =
            serde_json::from_value(value).map_err(|error| PolicyError::JsonParseError {
                file: file.to_path_buf(),
                error,
            })?;

        let issues = Self::validate(&policy);
        if has_errors(&issues) {
            return Err(PolicyError::Invalid {
                file: file.to_path_buf(),
                issues: issues.into_iter().filter(Issue::is_error).collect(),
            });
        }

        for issue in &issues {
            tracing::warn!(file = %file.display(), "{}", issue);
        }

        Ok(policy)
    }

    /// Lint a policy without loading it into an engine
    pub fn validate(policy: &SecurityPolicy) -> Vec<Issue> {
        lint(policy)
    }

    /// Write a policy as pretty JSON
    ///
    /// The content goes to a temporary file in the target directory which is
    /// then renamed over `path`, so readers never observe a partial file.
    pub fn save(policy: &SecurityPolicy, path: &Path) -> PolicyResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut json = policy.to_json().map_err(|error| PolicyError::JsonParseError {
            file: path.to_path_buf(),
            error,
        })?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| PolicyError::IoError(e.error))?;

        Ok(())
    }

    /// Resolve the active policy for a project root
    ///
    /// A source that exists but fails to load is an error; it never falls
    /// through to a lower-priority source.
    pub fn resolve(&self, root: &Path) -> PolicyResult<ResolvedPolicy> {
        if let Some(explicit) = &self.explicit_path {
            let policy = Self::load(explicit)?;
            tracing::debug!(path = %explicit.display(), "using explicit policy");
            return Ok(ResolvedPolicy {
                policy,
                source: PolicySource::Explicit(explicit.clone()),
            });
        }

        let project = Self::project_policy_path(root);
        if project.is_file() {
            let policy = Self::load(&project)?;
            tracing::debug!(path = %project.display(), "using project policy");
            return Ok(ResolvedPolicy {
                policy,
                source: PolicySource::Project(project),
            });
        }

        if let Some(default) = &self.default_path {
            if default.is_file() {
                let policy = Self::load(default)?;
                tracing::debug!(path = %default.display(), "using default policy");
                return Ok(ResolvedPolicy {
                    policy,
                    source: PolicySource::Default(default.clone()),
                });
            }
        }

        tracing::debug!("no policy file found, using builtin policy");
        Ok(ResolvedPolicy {
            policy: SecurityPolicy::builtin(),
            source: PolicySource::Builtin,
        })
    }

    /// Resolve like [`PolicyStore::resolve`], falling back to the built-in
    /// policy when a policy file is malformed
    pub fn resolve_graceful(&self, root: &Path) -> ResolvedPolicy {
        match self.resolve(root) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(error = %e, "policy failed to load, falling back to builtin policy");
                ResolvedPolicy {
                    policy: SecurityPolicy::builtin(),
                    source: PolicySource::Builtin,
                }
            }
        }
    }
}

/// Check the mandatory top-level keys before schema deserialization so the
/// error names the problem instead of a serde position
fn check_required(value: &Value, file: &Path) -> PolicyResult<()> {
    let object = value.as_object().ok_or_else(|| PolicyError::MissingField {
        field: "version".to_string(),
        file: file.to_path_buf(),
    })?;

    for field in ["version", "profile"] {
        if !object.contains_key(field) {
            return Err(PolicyError::MissingField {
                field: field.to_string(),
                file: file.to_path_buf(),
            });
        }
    }

    if let Some(name) = object.get("profile").and_then(Value::as_str) {
        if !Profile::ALL.iter().any(|profile| profile.as_str() == name) {
            return Err(PolicyError::UnknownProfile(name.to_string()));
        }
    }

    Ok(())
}
