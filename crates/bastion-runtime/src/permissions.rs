//! Permission validation
//!
//! The authoritative layer. Every check runs in the same order:
//! hardcoded guards first (length, traversal, symlinks, sensitive files,
//! injection, private addresses), then explicit policy denials, then the
//! policy whitelist. Nothing a later layer does can override an earlier one.
//!
//! Expected denials are values (`ValidationResult`), never errors.

use crate::paths;
use crate::sandbox::builtin_blocked_patterns;
use bastion_config::pattern::{
    compile_command_pattern, compile_name_glob, compile_rules, SHELL_METACHARACTERS,
};
use bastion_config::lint::has_errors;
use bastion_config::{
    cidr_match, domain_match, glob_match, is_always_denied, lint, CompiledRule, IpRange, Issue,
    PolicyError, PolicyResult, Profile, SecurityPolicy,
};
use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use url::{Host, Url};

/// Maximum accepted path length in bytes
pub const MAX_PATH_LEN: usize = 4096;
/// Maximum accepted command length in bytes
pub const MAX_COMMAND_LEN: usize = 8192;
/// Maximum accepted URL length in bytes
pub const MAX_URL_LEN: usize = 2048;
/// Maximum accepted environment variable name length in bytes
pub const MAX_ENV_NAME_LEN: usize = 256;

/// The layer that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layer {
    SensitiveFile,
    Traversal,
    Symlink,
    Policy,
    Injection,
    PrivateIp,
    DeniedPattern,
    InputTooLong,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::SensitiveFile => "SENSITIVE_FILE",
            Layer::Traversal => "TRAVERSAL",
            Layer::Symlink => "SYMLINK",
            Layer::Policy => "POLICY",
            Layer::Injection => "INJECTION",
            Layer::PrivateIp => "PRIVATE_IP",
            Layer::DeniedPattern => "DENIED_PATTERN",
            Layer::InputTooLong => "INPUT_TOO_LONG",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single validation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    approved: bool,
    reason: Option<String>,
    layer: Layer,
}

impl ValidationResult {
    fn approve(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: Some(reason.into()),
            layer: Layer::Policy,
        }
    }

    fn deny(layer: Layer, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            layer,
        }
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.approved { "APPROVED" } else { "DENIED" };
        match &self.reason {
            Some(reason) => write!(f, "{} [{}] {}", status, self.layer, reason),
            None => write!(f, "{} [{}]", status, self.layer),
        }
    }
}

/// Filesystem access kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsAccess {
    Read,
    Write,
}

impl FsAccess {
    fn field(&self) -> &'static str {
        match self {
            FsAccess::Read => "filesystem.read",
            FsAccess::Write => "filesystem.write",
        }
    }
}

/// Environment names are matched case-insensitively against denied globs
const ENV_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Authoritative validator over a compiled policy
#[derive(Debug, Clone)]
pub struct PermissionValidator {
    root: PathBuf,
    read_rules: Vec<CompiledRule>,
    write_rules: Vec<CompiledRule>,
    allowed_commands: Vec<Vec<String>>,
    blocked_commands: Vec<(String, Regex)>,
    denied_commands: Vec<(String, Regex)>,
    injection: Vec<String>,
    allowed_domains: Vec<String>,
    denied_ips: Vec<IpRange>,
    allowed_vars: Vec<String>,
    denied_vars: Vec<Pattern>,
}

impl PermissionValidator {
    /// Compile a policy for a project root, using the policy's own profile
    ///
    /// Fails if the policy has lint errors; a policy loaded through
    /// `PolicyStore` has already passed this check.
    pub fn new(policy: &SecurityPolicy, root: &Path) -> PolicyResult<Self> {
        Self::for_profile(policy, root, policy.profile)
    }

    /// Compile a policy for a project root under an explicit profile
    ///
    /// The profile selects the built-in destructive command patterns, which
    /// apply to every shell check together with the profile's
    /// `classifier.<profile>.blocked_patterns`.
    pub fn for_profile(
        policy: &SecurityPolicy,
        root: &Path,
        profile: Profile,
    ) -> PolicyResult<Self> {
        let issues = lint(policy);
        if has_errors(&issues) {
            return Err(PolicyError::Rejected(
                issues.into_iter().filter(Issue::is_error).collect(),
            ));
        }

        let root = paths::resolve(&paths::absolutize(root, &current_dir()));
        let rejected =
            |field: &str, message: String| PolicyError::Rejected(vec![Issue::error(field, message)]);

        let read_rules = compile_rules(&policy.filesystem.read, &root)
            .map_err(|e| rejected("filesystem.read", e.to_string()))?;
        let write_rules = compile_rules(&policy.filesystem.write, &root)
            .map_err(|e| rejected("filesystem.write", e.to_string()))?;

        let denied_commands = policy
            .shell
            .denied_patterns
            .iter()
            .map(|p| compile_command_pattern(p).map(|re| (p.clone(), re)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| rejected("shell.denied_patterns", e.to_string()))?;

        let extra_blocked = policy
            .classifier_overrides(profile)
            .map(|o| o.blocked_patterns.as_slice())
            .unwrap_or_default();
        let blocked_field = format!("classifier.{}.blocked_patterns", profile);
        let blocked_commands = builtin_blocked_patterns(profile)
            .into_iter()
            .map(str::to_string)
            .chain(extra_blocked.iter().cloned())
            .map(|p| compile_command_pattern(&p).map(|re| (p, re)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| rejected(&blocked_field, e.to_string()))?;

        let denied_ips = policy
            .network
            .denied_ips
            .iter()
            .map(|raw| IpRange::parse(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| rejected("network.denied_ips", e))?;

        let denied_vars = policy
            .environment
            .denied_patterns
            .iter()
            .map(|p| compile_name_glob(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| rejected("environment.denied_patterns", e.to_string()))?;

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
            root,
            read_rules,
            write_rules,
            allowed_commands: policy
                .shell
                .allowed_commands
                .iter()
                .map(|c| tokenize(c))
                .filter(|tokens| !tokens.is_empty())
                .collect(),
            blocked_commands,
            denied_commands,
            injection,
            allowed_domains: policy.network.allowed_domains.clone(),
            denied_ips,
            allowed_vars: policy.environment.allowed_vars.clone(),
            denied_vars,
        })
    }

    /// Canonical project root used to anchor relative rules and paths
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate reading a path
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate_fs_read(&self, path: &str) -> ValidationResult {
        self.validate_fs(path, FsAccess::Read)
    }

    /// Validate writing a path
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate_fs_write(&self, path: &str) -> ValidationResult {
        self.validate_fs(path, FsAccess::Write)
    }

    fn validate_fs(&self, raw: &str, access: FsAccess) -> ValidationResult {
        let result = self.check_fs(raw, access);
        tracing::debug!(access = access.field(), approved = result.approved, layer = %result.layer, "filesystem check");
        result
    }

    fn check_fs(&self, raw: &str, access: FsAccess) -> ValidationResult {
        if raw.len() > MAX_PATH_LEN {
            return ValidationResult::deny(Layer::InputTooLong, "path is too long");
        }
        if raw.trim().is_empty() {
            return ValidationResult::deny(Layer::Policy, "path is empty");
        }

        // Layer 0: traversal and symlinks
        if paths::has_traversal(raw) {
            return ValidationResult::deny(
                Layer::Traversal,
                "path contains a parent-directory reference",
            );
        }

        let requested = paths::absolutize(&paths::expand_home(raw), &self.root);
        if paths::is_symlink(&requested) {
            return ValidationResult::deny(Layer::Symlink, "path is a symbolic link");
        }

        // Layer 1: sensitive files, on the path as given
        if let Some(category) = paths::sensitive_category(&requested) {
            return ValidationResult::deny(
                Layer::SensitiveFile,
                format!("path is a protected {}", category),
            );
        }

        let canonical = paths::resolve(&requested);
        if paths::is_symlink(&canonical) {
            return ValidationResult::deny(Layer::Symlink, "resolved path is a symbolic link");
        }

        // Layer 1 again, on what the path actually points at
        if let Some(category) = paths::sensitive_category(&canonical) {
            return ValidationResult::deny(
                Layer::SensitiveFile,
                format!("path resolves to a protected {}", category),
            );
        }

        // Layer 2: policy rules
        let rules = match access {
            FsAccess::Read => &self.read_rules,
            FsAccess::Write => &self.write_rules,
        };
        let candidate = canonical.to_string_lossy();
        let outcome = glob_match(rules, &candidate);

        match outcome.rule_index.map(|i| &rules[i]) {
            Some(rule) if outcome.is_deny => ValidationResult::deny(
                Layer::DeniedPattern,
                format!("path matches deny rule '{}'", rule.source()),
            ),
            Some(rule) => ValidationResult::approve(format!("matched rule '{}'", rule.source())),
            None => ValidationResult::deny(
                Layer::Policy,
                format!("no {} rule matches", access.field()),
            ),
        }
    }

    /// Validate executing a shell command
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate_shell_execute(&self, command: &str) -> ValidationResult {
        let result = self.check_shell(command);
        tracing::debug!(approved = result.approved, layer = %result.layer, "shell check");
        result
    }

    fn check_shell(&self, command: &str) -> ValidationResult {
        if command.len() > MAX_COMMAND_LEN {
            return ValidationResult::deny(Layer::InputTooLong, "command is too long");
        }

        if let Some(sequence) = self.injection.iter().find(|s| command.contains(s.as_str())) {
            return ValidationResult::deny(
                Layer::Injection,
                format!("command contains shell metacharacter {:?}", sequence),
            );
        }

        let tokens = tokenize(command);
        let Some(program) = tokens.first() else {
            return ValidationResult::deny(Layer::Policy, "command is empty");
        };

        let normalized = tokens.join(" ");
        if let Some((source, _)) = self
            .blocked_commands
            .iter()
            .find(|(_, re)| re.is_match(&normalized))
        {
            return ValidationResult::deny(
                Layer::DeniedPattern,
                format!("command matches blocked pattern '{}'", source),
            );
        }

        if let Some((source, _)) = self
            .denied_commands
            .iter()
            .find(|(_, re)| re.is_match(&normalized))
        {
            return ValidationResult::deny(
                Layer::DeniedPattern,
                format!("command matches denied pattern '{}'", source),
            );
        }

        match self
            .allowed_commands
            .iter()
            .find(|allowed| is_token_prefix(allowed, &tokens))
        {
            Some(allowed) => {
                ValidationResult::approve(format!("matched allowed command '{}'", allowed.join(" ")))
            }
            None => ValidationResult::deny(
                Layer::Policy,
                format!("'{}' is not in shell.allowed_commands", program),
            ),
        }
    }

    /// Validate reaching a network endpoint
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate_network_access(&self, url: &str) -> ValidationResult {
        let result = self.check_network(url);
        tracing::debug!(approved = result.approved, layer = %result.layer, "network check");
        result
    }

    fn check_network(&self, raw: &str) -> ValidationResult {
        if raw.len() > MAX_URL_LEN {
            return ValidationResult::deny(Layer::InputTooLong, "URL is too long");
        }

        let Some(parsed) = parse_url(raw) else {
            return ValidationResult::deny(Layer::Policy, "URL could not be parsed");
        };

        let host = match parsed.host() {
            Some(Host::Ipv4(ip)) => NetworkHost::Ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => NetworkHost::Ip(IpAddr::V6(ip)),
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_start_matches('[').trim_end_matches(']');
                match numeric_host(domain) {
                    Some(ip) => NetworkHost::Ip(ip),
                    None => NetworkHost::Domain(domain.to_ascii_lowercase()),
                }
            }
            None => return ValidationResult::deny(Layer::Policy, "URL has no host"),
        };

        // Hardcoded SSRF guard, then policy denials
        let host_text = match &host {
            NetworkHost::Ip(ip) => {
                if is_always_denied(*ip) {
                    return ValidationResult::deny(
                        Layer::PrivateIp,
                        "address is in a private, loopback, or metadata range",
                    );
                }
                if cidr_match(*ip, &self.denied_ips) {
                    return ValidationResult::deny(
                        Layer::PrivateIp,
                        "address is in network.denied_ips",
                    );
                }
                ip.to_string()
            }
            NetworkHost::Domain(domain) => {
                let bare = domain.trim_end_matches('.');
                if bare == "localhost" || bare.ends_with(".localhost") {
                    return ValidationResult::deny(Layer::PrivateIp, "host is a loopback name");
                }
                domain.clone()
            }
        };

        match self
            .allowed_domains
            .iter()
            .find(|pattern| domain_match(pattern, &host_text))
        {
            Some(pattern) => {
                ValidationResult::approve(format!("host matches allowed domain '{}'", pattern))
            }
            None => ValidationResult::deny(
                Layer::Policy,
                format!("'{}' is not in network.allowed_domains", host_text),
            ),
        }
    }

    /// Validate reading an environment variable
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate_env_access(&self, name: &str) -> ValidationResult {
        let result = self.check_env(name);
        tracing::debug!(approved = result.approved, layer = %result.layer, "environment check");
        result
    }

    fn check_env(&self, name: &str) -> ValidationResult {
        if name.len() > MAX_ENV_NAME_LEN {
            return ValidationResult::deny(Layer::InputTooLong, "variable name is too long");
        }
        if name.is_empty() {
            return ValidationResult::deny(Layer::Policy, "variable name is empty");
        }

        if let Some(pattern) = self
            .denied_vars
            .iter()
            .find(|glob| glob.matches_with(name, ENV_MATCH_OPTIONS))
        {
            return ValidationResult::deny(
                Layer::DeniedPattern,
                format!("variable matches denied pattern '{}'", pattern.as_str()),
            );
        }

        if self.allowed_vars.iter().any(|allowed| allowed == name) {
            ValidationResult::approve("variable is in environment.allowed_vars")
        } else {
            ValidationResult::deny(
                Layer::Policy,
                format!("'{}' is not in environment.allowed_vars", name),
            )
        }
    }
}

enum NetworkHost {
    Ip(IpAddr),
    Domain(String),
}

/// Parse a URL, treating scheme-less input as `https://`
fn parse_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains("://") {
        Url::parse(raw).ok()
    } else {
        Url::parse(&format!("https://{}", raw)).ok()
    }
}

/// Address a host string resolves to under special-scheme host parsing
///
/// Opaque hosts of non-special schemes (`gopher://2852039166/`) skip the IPv4
/// number parser, so integer, hex, octal and shortened forms are reparsed as
/// an `http` host.
fn numeric_host(domain: &str) -> Option<IpAddr> {
    if let Ok(ip) = domain.parse::<IpAddr>() {
        return Some(ip);
    }
    let reparsed = Url::parse(&format!("http://{}/", domain)).ok()?;
    match reparsed.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        Host::Domain(_) => None,
    }
}

/// Whitespace tokenization; not a shell grammar
pub(crate) fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Whether `prefix` is a leading run of `tokens`
pub(crate) fn is_token_prefix(prefix: &[String], tokens: &[String]) -> bool {
    !prefix.is_empty() && tokens.len() >= prefix.len() && tokens[..prefix.len()] == *prefix
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}
