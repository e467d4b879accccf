//! Security Policy Schema
//!
//! Defines the JSON policy document consumed by the authorization engine.
//! A policy is loaded once per process and treated as read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Security policy loaded from `policy.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecurityPolicy {
    /// Policy schema version (required)
    pub version: String,

    /// Active profile (required)
    pub profile: Profile,

    /// Filesystem rules
    #[serde(default)]
    pub filesystem: FilesystemRules,

    /// Shell command rules
    #[serde(default)]
    pub shell: ShellRules,

    /// Network rules
    #[serde(default)]
    pub network: NetworkRules,

    /// Environment variable rules
    #[serde(default)]
    pub environment: EnvironmentRules,

    /// Per-profile overrides for the fast-path classifier
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub classifier: BTreeMap<Profile, ClassifierOverrides>,
}

/// Filesystem rules: ordered glob lists, a leading `!` marks a deny rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct FilesystemRules {
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub read: Vec<PatternRule>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub write: Vec<PatternRule>,
}

/// Shell command rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ShellRules {
    /// Command prefixes that may run (e.g. "git status", "pytest")
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_commands: Vec<String>,

    /// Case-insensitive regexes that always deny
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_patterns: Vec<String>,

    /// Extra metacharacter sequences treated as injection, on top of the
    /// built-in set
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub injection_patterns: Vec<String>,
}

/// Network rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct NetworkRules {
    /// Domain patterns (`example.com`, `*.example.com`, `*`)
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,

    /// Exact IPs and CIDR blocks, denied in addition to the built-in set
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_ips: Vec<String>,
}

/// Environment variable rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentRules {
    /// Exact variable names
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_vars: Vec<String>,

    /// Glob patterns; a match denies even an explicitly allowed name
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_patterns: Vec<String>,
}

/// Classifier overrides for one profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ClassifierOverrides {
    /// Replaces the built-in safe command list when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_commands: Option<Vec<String>>,

    /// Added to the built-in blocked patterns (never replaces them)
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_patterns: Vec<String>,
}

/// Named policy strictness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    Testing,
    Production,
}

impl Profile {
    /// All profiles in increasing strictness
    pub const ALL: [Profile; 3] = [Profile::Development, Profile::Testing, Profile::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Testing => "testing",
            Profile::Production => "production",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = crate::PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "testing" | "test" => Ok(Profile::Testing),
            "production" | "prod" => Ok(Profile::Production),
            _ => Err(crate::PolicyError::UnknownProfile(s.to_string())),
        }
    }
}

/// Polarity of a filesystem rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleAction {
    Allow,
    Deny,
}

/// A parsed filesystem rule
///
/// Written in JSON as a plain string; `"!secrets/**"` parses to a deny rule
/// for `secrets/**`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PatternRule {
    pub action: RuleAction,
    pub pattern: String,
}

impl PatternRule {
    pub fn allow(pattern: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Allow,
            pattern: pattern.into(),
        }
    }

    pub fn deny(pattern: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Deny,
            pattern: pattern.into(),
        }
    }

    pub fn is_deny(&self) -> bool {
        self.action == RuleAction::Deny
    }
}

impl From<String> for PatternRule {
    fn from(raw: String) -> Self {
        match raw.strip_prefix('!') {
            Some(rest) => PatternRule::deny(rest),
            None => PatternRule::allow(raw),
        }
    }
}

impl From<&str> for PatternRule {
    fn from(raw: &str) -> Self {
        PatternRule::from(raw.to_string())
    }
}

impl From<PatternRule> for String {
    fn from(rule: PatternRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            RuleAction::Allow => f.write_str(&self.pattern),
            RuleAction::Deny => write!(f, "!{}", self.pattern),
        }
    }
}

impl SecurityPolicy {
    /// Create an empty policy for a profile (everything default-denied)
    pub fn new(profile: Profile) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            profile,
            filesystem: FilesystemRules::default(),
            shell: ShellRules::default(),
            network: NetworkRules::default(),
            environment: EnvironmentRules::default(),
            classifier: BTreeMap::new(),
        }
    }

    /// Conservative built-in policy used when no policy file exists
    ///
    /// Development profile with empty allow-lists: nothing passes the policy
    /// layer, so every request outside the classifier's safe list needs
    /// approval.
    pub fn builtin() -> Self {
        Self::new(Profile::Development)
    }

    /// Load policy from a JSON string
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Serialize policy to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Classifier overrides for a profile, if the policy declares any
    pub fn classifier_overrides(&self, profile: Profile) -> Option<&ClassifierOverrides> {
        self.classifier.get(&profile)
    }
}

/// Schema version written by `SecurityPolicy::new`
pub const CURRENT_VERSION: &str = "1.0";
