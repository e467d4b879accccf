//! Static policy linting
//!
//! Reports problems in a policy without running an authorization call.
//! Errors make a policy unloadable; warnings are advisory.

use crate::pattern::{
    compile_command_pattern, compile_name_glob, is_valid_domain_pattern, IpRange,
    SHELL_METACHARACTERS,
};
use crate::policy::{PatternRule, Profile, SecurityPolicy};
use serde::Serialize;
use std::fmt;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single lint finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    /// Dotted path to the offending field, e.g. `filesystem.read[2]`
    pub field: String,
    pub message: String,
}

impl Issue {
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", level, self.field, self.message)
    }
}

/// Check whether any issue is an error
pub fn has_errors(issues: &[Issue]) -> bool {
    issues.iter().any(Issue::is_error)
}

/// Lint a policy
pub fn lint(policy: &SecurityPolicy) -> Vec<Issue> {
    let mut issues = Vec::new();

    lint_version(policy, &mut issues);
    lint_path_rules("filesystem.read", &policy.filesystem.read, &mut issues);
    lint_path_rules("filesystem.write", &policy.filesystem.write, &mut issues);
    lint_shell(policy, &mut issues);
    lint_network(policy, &mut issues);
    lint_environment(policy, &mut issues);
    lint_classifier(policy, &mut issues);

    issues
}

fn lint_version(policy: &SecurityPolicy, issues: &mut Vec<Issue>) {
    let version = policy.version.trim();
    if version.is_empty() {
        issues.push(Issue::error("version", "version cannot be empty"));
        return;
    }

    let major = version.split('.').next().unwrap_or_default();
    if major != "1" {
        issues.push(Issue::warning(
            "version",
            format!("unrecognized policy version '{}', expected 1.x", version),
        ));
    }
}

fn lint_path_rules(field: &str, rules: &[PatternRule], issues: &mut Vec<Issue>) {
    for (index, rule) in rules.iter().enumerate() {
        let at = format!("{}[{}]", field, index);

        if rule.pattern.trim().is_empty() {
            issues.push(Issue::error(at, "pattern cannot be empty"));
            continue;
        }

        if let Err(e) = glob::Pattern::new(&rule.pattern) {
            issues.push(Issue::error(at, format!("invalid glob '{}': {}", rule.pattern, e)));
            continue;
        }

        if rule.is_deny() {
            let shadowing = rules[..index]
                .iter()
                .find(|earlier| !earlier.is_deny() && covers(&earlier.pattern, &rule.pattern));
            if let Some(earlier) = shadowing {
                issues.push(Issue::warning(
                    at,
                    format!(
                        "deny rule '{}' is shadowed by earlier allow rule '{}' (first match wins; list deny rules first)",
                        rule, earlier
                    ),
                ));
            }
        }
    }
}

/// Conservative check that every path matching `inner` also matches `outer`
fn covers(outer: &str, inner: &str) -> bool {
    if outer == inner || outer == "**" {
        return true;
    }
    match outer.strip_suffix("/**") {
        Some(prefix) if !prefix.contains(['*', '?', '[']) => {
            inner == prefix || inner.starts_with(&format!("{}/", prefix))
        }
        _ => false,
    }
}

fn lint_shell(policy: &SecurityPolicy, issues: &mut Vec<Issue>) {
    let shell = &policy.shell;

    for (index, command) in shell.allowed_commands.iter().enumerate() {
        let at = format!("shell.allowed_commands[{}]", index);
        if command.trim().is_empty() {
            issues.push(Issue::error(at, "command cannot be empty"));
        } else if let Some(meta) = find_metacharacter(command, &shell.injection_patterns) {
            issues.push(Issue::warning(
                at,
                format!(
                    "command contains metacharacter {:?} and can never be approved",
                    meta
                ),
            ));
        }
    }

    for (index, pattern) in shell.denied_patterns.iter().enumerate() {
        lint_command_pattern(&format!("shell.denied_patterns[{}]", index), pattern, issues);
    }

    for (index, sequence) in shell.injection_patterns.iter().enumerate() {
        if sequence.is_empty() {
            issues.push(Issue::error(
                format!("shell.injection_patterns[{}]", index),
                "injection pattern cannot be empty",
            ));
        }
    }
}

fn lint_command_pattern(at: &str, pattern: &str, issues: &mut Vec<Issue>) {
    if pattern.trim().is_empty() {
        issues.push(Issue::error(at, "pattern cannot be empty"));
    } else if let Err(e) = compile_command_pattern(pattern) {
        issues.push(Issue::error(at, format!("invalid regex: {}", e)));
    }
}

fn find_metacharacter<'a>(command: &str, extra: &'a [String]) -> Option<String> {
    SHELL_METACHARACTERS
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str).filter(|s| !s.is_empty()))
        .find(|meta| command.contains(meta))
        .map(str::to_string)
}

fn lint_network(policy: &SecurityPolicy, issues: &mut Vec<Issue>) {
    for (index, domain) in policy.network.allowed_domains.iter().enumerate() {
        let at = format!("network.allowed_domains[{}]", index);
        if !is_valid_domain_pattern(domain) {
            issues.push(Issue::error(
                at,
                format!(
                    "unsupported domain pattern '{}' (only a single leading '*.' wildcard is allowed)",
                    domain
                ),
            ));
        } else if domain.trim() == "*" && policy.profile == Profile::Production {
            issues.push(Issue::warning(
                at,
                "wildcard '*' allows every public host in the production profile",
            ));
        }
    }

    for (index, range) in policy.network.denied_ips.iter().enumerate() {
        if let Err(e) = IpRange::parse(range) {
            issues.push(Issue::error(format!("network.denied_ips[{}]", index), e));
        }
    }
}

fn lint_environment(policy: &SecurityPolicy, issues: &mut Vec<Issue>) {
    let env = &policy.environment;

    let mut denied = Vec::new();
    for (index, pattern) in env.denied_patterns.iter().enumerate() {
        let at = format!("environment.denied_patterns[{}]", index);
        if pattern.trim().is_empty() {
            issues.push(Issue::error(at, "pattern cannot be empty"));
            continue;
        }
        match compile_name_glob(pattern) {
            Ok(glob) => denied.push(glob),
            Err(e) => issues.push(Issue::error(at, format!("invalid glob '{}': {}", pattern, e))),
        }
    }

    for (index, var) in env.allowed_vars.iter().enumerate() {
        let at = format!("environment.allowed_vars[{}]", index);
        if var.trim().is_empty() {
            issues.push(Issue::error(at, "variable name cannot be empty"));
        } else if let Some(glob) = denied.iter().find(|glob| glob.matches(var)) {
            issues.push(Issue::warning(
                at,
                format!(
                    "'{}' is also matched by denied pattern '{}' and will always be denied",
                    var,
                    glob.as_str()
                ),
            ));
        }
    }
}

fn lint_classifier(policy: &SecurityPolicy, issues: &mut Vec<Issue>) {
    for (profile, overrides) in &policy.classifier {
        if let Some(safe) = &overrides.safe_commands {
            for (index, command) in safe.iter().enumerate() {
                let at = format!("classifier.{}.safe_commands[{}]", profile, index);
                if command.trim().is_empty() {
                    issues.push(Issue::error(at, "command cannot be empty"));
                } else if let Some(meta) = find_metacharacter(command, &[]) {
                    issues.push(Issue::warning(
                        at,
                        format!("safe command contains metacharacter {:?} and never matches", meta),
                    ));
                }
            }
        }

        for (index, pattern) in overrides.blocked_patterns.iter().enumerate() {
            lint_command_pattern(
                &format!("classifier.{}.blocked_patterns[{}]", profile, index),
                pattern,
                issues,
            );
        }
    }
}
