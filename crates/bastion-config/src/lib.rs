//! Bastion Policy Configuration
//!
//! Provides the declarative side of the Bastion authorization engine:
//! - The security policy schema (`SecurityPolicy`)
//! - Pattern matching primitives (glob, CIDR, domain wildcards)
//! - Policy loading, saving, and source resolution (`PolicyStore`)
//! - Static policy linting
//!
//! # Policy Resolution
//!
//! Policies are resolved in the following order (first existing source wins):
//! 1. Project override (`<project>/.bastion/policy.json`)
//! 2. Bundled/system default supplied by the caller
//! 3. Built-in conservative policy (development profile, empty allow-lists)
//!
//! # Example
//!
//! ```no_run
//! use bastion_config::PolicyStore;
//! use std::path::Path;
//!
//! let store = PolicyStore::new();
//! let resolved = store.resolve(Path::new(".")).unwrap();
//! println!("active profile: {}", resolved.policy.profile);
//! ```

pub mod lint;
pub mod pattern;
pub mod policy;
pub mod store;

use std::path::PathBuf;
use thiserror::Error;

/// Policy errors
///
/// These are setup-time failures only. A policy that cannot be loaded makes
/// safe operation impossible, so callers either halt or fall back to the
/// built-in policy explicitly.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read policy file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid JSON in {file}: {error}")]
    JsonParseError {
        file: PathBuf,
        error: serde_json::Error,
    },

    #[error("Missing required field '{field}' in {file}")]
    MissingField { field: String, file: PathBuf },

    #[error("Unknown profile '{0}' (expected development, testing, or production)")]
    UnknownProfile(String),

    #[error("Invalid policy in {file}: {}", summarize(.issues))]
    Invalid { file: PathBuf, issues: Vec<Issue> },

    /// A policy built in memory (not loaded from a file) failed to compile
    #[error("Policy rejected: {}", summarize(.0))]
    Rejected(Vec<Issue>),
}

fn summarize(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;

// Re-export main types
pub use lint::{lint, Issue, Severity};
pub use pattern::{
    cidr_match, domain_match, glob_match, is_always_denied, CompiledRule, IpRange, MatchOutcome,
};
pub use policy::{PatternRule, Profile, RuleAction, SecurityPolicy};
pub use store::{PolicySource, PolicyStore, ResolvedPolicy};
