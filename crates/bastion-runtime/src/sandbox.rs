//! Sandbox classifier
//!
//! A fast pre-filter for shell commands. `SAFE` and `BLOCKED` are final;
//! everything else goes to the permission validator.

use crate::paths;
use crate::permissions::{is_token_prefix, tokenize, MAX_COMMAND_LEN};
use bastion_config::pattern::{compile_command_pattern, SHELL_METACHARACTERS};
use bastion_config::{Issue, PolicyError, PolicyResult, Profile, SecurityPolicy};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Classifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Safe,
    Blocked,
    NeedsApproval,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Safe => "SAFE",
            Classification::Blocked => "BLOCKED",
            Classification::NeedsApproval => "NEEDS_APPROVAL",
        }
    }

    /// Whether the verdict short-circuits the validator
    pub fn is_final(&self) -> bool {
        !matches!(self, Classification::NeedsApproval)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DEVELOPMENT_SAFE: &[&str] = &[
    "ls",
    "pwd",
    "echo",
    "git status",
    "git diff",
    "git log",
    "git branch",
    "pytest",
    "cargo test",
    "cargo check",
    "cargo build",
    "npm test",
    "which",
    "whoami",
    "date",
    "head",
    "tail",
    "wc",
    "cat",
    "grep",
];

const TESTING_SAFE: &[&str] = &[
    "ls",
    "pwd",
    "git status",
    "git diff",
    "git log",
    "pytest",
    "cargo test",
    "npm test",
];

const PRODUCTION_SAFE: &[&str] = &["ls", "pwd", "git status"];

/// Destructive commands blocked in every profile
const UNIVERSAL_BLOCKED: &[&str] = &[
    // rm -rf /, rm -r -f ~, rm --recursive *
    r"\brm\s+(?:-\S+\s+)*(?:-[a-z]*r[a-z]*|--recursive)\s+(?:-\S+\s+)*(?:/|/\*|~/?|\*|\$home/?)(?:\s|$)",
    r"\bmkfs(?:\.\w+)?\b",
    r"\bdd\s.*\bif=",
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    r"\bchmod\s+(?:-\S+\s+)*(?:-[a-z]*r[a-z]*|--recursive)\s+(?:-\S+\s+)*0?777\s+/(?:\s|$)",
    r"\bof=/dev/(?:sd|hd|nvme|xvd)",
    r">\s*/dev/(?:sd|hd|nvme|xvd)",
];

const ELEVATED_BLOCKED: &[&str] = &[r"\bsudo\b", r"\bsu\s+-"];

const PRODUCTION_BLOCKED: &[&str] = &[r"\bgit\s+push\s+(?:.*\s)?(?:--force|-f)\b"];

/// Built-in safe commands for a profile
pub fn builtin_safe_commands(profile: Profile) -> &'static [&'static str] {
    match profile {
        Profile::Development => DEVELOPMENT_SAFE,
        Profile::Testing => TESTING_SAFE,
        Profile::Production => PRODUCTION_SAFE,
    }
}

/// Built-in blocked patterns for a profile
pub fn builtin_blocked_patterns(profile: Profile) -> Vec<&'static str> {
    let mut patterns = UNIVERSAL_BLOCKED.to_vec();
    if profile != Profile::Development {
        patterns.extend_from_slice(ELEVATED_BLOCKED);
    }
    if profile == Profile::Production {
        patterns.extend_from_slice(PRODUCTION_BLOCKED);
    }
    patterns
}

/// Profile-specific command classifier
#[derive(Debug, Clone)]
pub struct SandboxClassifier {
    profile: Profile,
    safe_commands: Vec<Vec<String>>,
    blocked_patterns: Vec<Regex>,
    injection: Vec<String>,
}

impl SandboxClassifier {
    /// Build the classifier for `profile`
    ///
    /// Policy `shell.denied_patterns` and `classifier.<profile>.blocked_patterns`
    /// extend the built-in blocked set. `classifier.<profile>.safe_commands`
    /// replaces the built-in safe list.
    pub fn new(profile: Profile, policy: &SecurityPolicy) -> PolicyResult<Self> {
        let overrides = policy.classifier_overrides(profile);

        let safe_commands = match overrides.and_then(|o| o.safe_commands.as_ref()) {
            Some(custom) => custom.iter().map(|c| tokenize(c)).collect::<Vec<_>>(),
            None => builtin_safe_commands(profile)
                .iter()
                .map(|c| tokenize(c))
                .collect(),
        };

        let extra_blocked = overrides
            .map(|o| o.blocked_patterns.as_slice())
            .unwrap_or_default();

        let blocked_patterns = builtin_blocked_patterns(profile)
            .into_iter()
            .map(str::to_string)
            .chain(policy.shell.denied_patterns.iter().cloned())
            .chain(extra_blocked.iter().cloned())
            .map(|pattern| {
                compile_command_pattern(&pattern).map_err(|e| {
                    PolicyError::Rejected(vec![Issue::error(
                        format!("classifier.{}.blocked_patterns", profile),
                        e.to_string(),
                    )])
                })
            })
            .collect::<PolicyResult<Vec<_>>>()?;

        let injection = SHELL_METACHARACTERS
            .iter()
            .map(|s| s.to_string())
            .chain(
                policy
                    .shell
                    .injection_patterns
                    .iter()
                    .filter(|s| !s.is_empty())
                    .cloned(),
            )
            .collect();

        Ok(Self {
            profile,
            safe_commands: safe_commands
                .into_iter()
                .filter(|tokens| !tokens.is_empty())
                .collect(),
            blocked_patterns,
            injection,
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Classify a command
    ///
    /// Pure: the same command always gets the same verdict from the same
    /// classifier.
    pub fn classify(&self, command: &str) -> Classification {
        if command.len() > MAX_COMMAND_LEN {
            return Classification::NeedsApproval;
        }

        if self.injection.iter().any(|s| command.contains(s.as_str())) {
            return Classification::Blocked;
        }

        let tokens = tokenize(command);
        if tokens.is_empty() {
            return Classification::NeedsApproval;
        }

        let normalized = tokens.join(" ");
        if self.blocked_patterns.iter().any(|re| re.is_match(&normalized)) {
            return Classification::Blocked;
        }

        let safe = self
            .safe_commands
            .iter()
            .find(|safe| is_token_prefix(safe, &tokens));

        match safe {
            Some(prefix) if !tokens[prefix.len()..].iter().any(|arg| touches_protected(arg)) => {
                Classification::Safe
            }
            _ => Classification::NeedsApproval,
        }
    }
}

/// Whether an argument names a sensitive file or escapes via `..`
fn touches_protected(arg: &str) -> bool {
    let value = arg.rsplit_once('=').map_or(arg, |(_, value)| value);
    [arg, value].iter().any(|candidate| {
        paths::has_traversal(candidate)
            || paths::sensitive_category(&paths::expand_home(candidate)).is_some()
            || paths::sensitive_category(Path::new(candidate)).is_some()
    })
}
