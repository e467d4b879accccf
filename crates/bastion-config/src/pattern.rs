//! Pattern matching primitives
//!
//! Glob rules for filesystem paths, CIDR blocks for IP addresses, and
//! single-level domain wildcards. All matchers are pure functions over
//! precompiled inputs.

use crate::policy::{PatternRule, RuleAction};
use glob::{MatchOptions, Pattern, PatternError};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;

/// Shell metacharacter sequences that are always treated as injection
pub const SHELL_METACHARACTERS: &[&str] = &[";", "|", "&", "`", "$(", ">", "<", "\0", "\n", "\r"];

/// `*` never crosses `/`, `**` does
const PATH_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Result of matching a candidate against an ordered rule list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchOutcome {
    /// Whether any rule matched
    pub matched: bool,
    /// Whether the first matching rule is a deny rule
    pub is_deny: bool,
    /// Index of the first matching rule
    pub rule_index: Option<usize>,
}

impl MatchOutcome {
    /// True only when the first matching rule is an allow rule
    pub fn is_allowed(&self) -> bool {
        self.matched && !self.is_deny
    }
}

/// A filesystem rule compiled to an anchored glob
#[derive(Debug, Clone)]
pub struct CompiledRule {
    action: RuleAction,
    source: String,
    glob: Pattern,
}

impl CompiledRule {
    /// Compile a rule, anchoring relative patterns at `root`
    ///
    /// - `/abs/**` is used as written
    /// - `~/x/**` is anchored at the home directory
    /// - anything else is anchored at `root`
    pub fn compile(rule: &PatternRule, root: &Path) -> Result<Self, PatternError> {
        let anchored = anchor_pattern(&rule.pattern, root);
        Ok(Self {
            action: rule.action,
            source: rule.to_string(),
            glob: Pattern::new(&anchored)?,
        })
    }

    pub fn is_deny(&self) -> bool {
        self.action == RuleAction::Deny
    }

    /// The rule as written in the policy (including a leading `!`)
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.glob.matches_with(candidate, PATH_MATCH_OPTIONS)
    }
}

/// Compile an ordered rule list
pub fn compile_rules(rules: &[PatternRule], root: &Path) -> Result<Vec<CompiledRule>, PatternError> {
    rules
        .iter()
        .map(|rule| CompiledRule::compile(rule, root))
        .collect()
}

/// Match a candidate against ordered rules; the first match wins
///
/// No match means "not matched", which callers treat as deny.
pub fn glob_match(rules: &[CompiledRule], candidate: &str) -> MatchOutcome {
    rules
        .iter()
        .position(|rule| rule.matches(candidate))
        .map(|index| MatchOutcome {
            matched: true,
            is_deny: rules[index].is_deny(),
            rule_index: Some(index),
        })
        .unwrap_or_default()
}

fn anchor_pattern(pattern: &str, root: &Path) -> String {
    if pattern.starts_with('/') {
        return pattern.to_string();
    }

    if let Some(rest) = pattern.strip_prefix("~/") {
        return match dirs::home_dir() {
            Some(home) => {
                let home = home.canonicalize().unwrap_or(home);
                join_escaped(&home, rest)
            }
            // No home directory: keep the pattern unanchored so it can
            // never match an absolute candidate.
            None => pattern.to_string(),
        };
    }

    join_escaped(root, pattern.trim_start_matches("./"))
}

fn join_escaped(base: &Path, rest: &str) -> String {
    let base = base.to_string_lossy().replace('\\', "/");
    format!("{}/{}", Pattern::escape(base.trim_end_matches('/')), rest)
}

/// Compile a plain (unanchored) glob, used for environment variable names
pub fn compile_name_glob(pattern: &str) -> Result<Pattern, PatternError> {
    Pattern::new(pattern)
}

/// Compile a command pattern as a case-insensitive regex
///
/// Plain strings without regex metacharacters behave as substrings.
pub fn compile_command_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()
}

/// An exact IP address or CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRange {
    V4 { network: Ipv4Addr, prefix: u8 },
    V6 { network: Ipv6Addr, prefix: u8 },
}

impl IpRange {
    pub const fn v4(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Self {
        IpRange::V4 {
            network: Ipv4Addr::new(a, b, c, d),
            prefix,
        }
    }

    /// Parse `a.b.c.d`, `a.b.c.d/n`, or an IPv6 address with optional prefix
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| format!("invalid prefix length in '{}'", raw))?;
                (addr, Some(prefix))
            }
            None => (raw, None),
        };

        let ip = addr
            .parse::<IpAddr>()
            .map_err(|_| format!("invalid IP address '{}'", addr))?;

        match ip {
            IpAddr::V4(network) => {
                let prefix = prefix.unwrap_or(32);
                if prefix > 32 {
                    return Err(format!("IPv4 prefix must be 0-32, got {}", prefix));
                }
                Ok(IpRange::V4 { network, prefix })
            }
            IpAddr::V6(network) => {
                let prefix = prefix.unwrap_or(128);
                if prefix > 128 {
                    return Err(format!("IPv6 prefix must be 0-128, got {}", prefix));
                }
                Ok(IpRange::V6 { network, prefix })
            }
        }
    }

    /// Check whether an address falls inside this range
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, normalize_ip(ip)) {
            (IpRange::V4 { network, prefix }, IpAddr::V4(ip)) => {
                let mask = if *prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(*prefix))
                };
                u32::from(ip) & mask == u32::from(*network) & mask
            }
            (IpRange::V6 { network, prefix }, IpAddr::V6(ip)) => {
                let mask = if *prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(*prefix))
                };
                u128::from(ip) & mask == u128::from(*network) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpRange::parse(s)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpRange::V4 { network, prefix } => write!(f, "{}/{}", network, prefix),
            IpRange::V6 { network, prefix } => write!(f, "{}/{}", network, prefix),
        }
    }
}

/// IPv4-mapped IPv6 addresses are compared in their IPv4 form
fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Ranges denied regardless of policy content (SSRF protection)
const ALWAYS_DENIED_V4: [IpRange; 7] = [
    IpRange::v4(10, 0, 0, 0, 8),
    IpRange::v4(172, 16, 0, 0, 12),
    IpRange::v4(192, 168, 0, 0, 16),
    IpRange::v4(127, 0, 0, 0, 8),
    IpRange::v4(0, 0, 0, 0, 8),
    // Link-local, including the 169.254.169.254 metadata endpoint
    IpRange::v4(169, 254, 0, 0, 16),
    // Carrier-grade NAT, used by some cloud metadata services
    IpRange::v4(100, 64, 0, 0, 10),
];

/// Check an address against ranges (exact IPs are /32 or /128 ranges)
pub fn cidr_match(ip: IpAddr, ranges: &[IpRange]) -> bool {
    ranges.iter().any(|range| range.contains(ip))
}

/// Built-in private, loopback, and metadata address check
pub fn is_always_denied(ip: IpAddr) -> bool {
    match normalize_ip(ip) {
        ip @ IpAddr::V4(_) => cidr_match(ip, &ALWAYS_DENIED_V4),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique local fc00::/7
                || (first & 0xfe00) == 0xfc00
                // Link-local fe80::/10
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Match a host against a domain pattern
///
/// `*` matches any host; `*.example.com` matches `example.com` and any
/// subdomain of it. Wildcards anywhere else never match.
pub fn domain_match(pattern: &str, host: &str) -> bool {
    let pattern = normalize_host(pattern);
    let host = normalize_host(host);

    if host.is_empty() || host.contains('*') {
        return false;
    }

    if pattern == "*" {
        return true;
    }

    if let Some(domain) = pattern.strip_prefix("*.") {
        if domain.is_empty() || domain.contains('*') {
            return false;
        }
        return host == domain
            || host
                .strip_suffix(domain)
                .map_or(false, |prefix| prefix.ends_with('.'));
    }

    !pattern.contains('*') && pattern == host
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Whether a domain pattern uses only supported wildcard forms
pub fn is_valid_domain_pattern(pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(domain) => !domain.is_empty() && !domain.contains('*'),
        None => !pattern.contains('*'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rules(raw: &[&str]) -> Vec<CompiledRule> {
        let parsed: Vec<PatternRule> = raw.iter().map(|r| PatternRule::from(*r)).collect();
        compile_rules(&parsed, &PathBuf::from("/project")).unwrap()
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let rules = rules(&["src/**"]);
        assert!(glob_match(&rules, "/project/src/a.py").is_allowed());
        assert!(glob_match(&rules, "/project/src/deep/nested/b.py").is_allowed());
        assert!(!glob_match(&rules, "/project/tests/a.py").matched);
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let rules = rules(&["src/*.py"]);
        assert!(glob_match(&rules, "/project/src/a.py").is_allowed());
        assert!(!glob_match(&rules, "/project/src/sub/a.py").matched);
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        let rules = rules(&["v?.txt"]);
        assert!(glob_match(&rules, "/project/v1.txt").matched);
        assert!(!glob_match(&rules, "/project/v10.txt").matched);
    }

    #[test]
    fn test_first_match_wins() {
        let deny_first = rules(&["!src/secret/**", "src/**"]);
        let outcome = glob_match(&deny_first, "/project/src/secret/k.txt");
        assert!(outcome.matched && outcome.is_deny);
        assert_eq!(outcome.rule_index, Some(0));

        let allow_first = rules(&["src/**", "!src/secret/**"]);
        let outcome = glob_match(&allow_first, "/project/src/secret/k.txt");
        assert!(outcome.is_allowed());
        assert_eq!(outcome.rule_index, Some(0));
    }

    #[test]
    fn test_absolute_pattern_not_anchored() {
        let rules = rules(&["/tmp/**"]);
        assert!(glob_match(&rules, "/tmp/scratch.txt").is_allowed());
    }

    #[test]
    fn test_root_with_glob_characters_is_escaped() {
        let parsed = vec![PatternRule::allow("src/**")];
        let rules = compile_rules(&parsed, Path::new("/work/[draft]")).unwrap();
        assert!(glob_match(&rules, "/work/[draft]/src/a.rs").is_allowed());
        assert!(!glob_match(&rules, "/work/d/src/a.rs").matched);
    }

    #[test]
    fn test_empty_rules_never_match() {
        assert_eq!(glob_match(&[], "/project/a"), MatchOutcome::default());
    }

    #[test]
    fn test_cidr_contains() {
        let range = IpRange::parse("10.1.0.0/16").unwrap();
        assert!(range.contains("10.1.200.3".parse().unwrap()));
        assert!(!range.contains("10.2.0.1".parse().unwrap()));
    }

    #[test]
    fn test_exact_ip_range() {
        let range = IpRange::parse("203.0.113.7").unwrap();
        assert!(cidr_match("203.0.113.7".parse().unwrap(), &[range]));
        assert!(!cidr_match("203.0.113.8".parse().unwrap(), &[range]));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(IpRange::parse("10.0.0.0/33").is_err());
        assert!(IpRange::parse("not-an-ip").is_err());
        assert!(IpRange::parse("10.0.0.0/x").is_err());
    }

    #[test]
    fn test_always_denied_v4() {
        for ip in [
            "10.0.0.1",
            "172.16.5.4",
            "172.31.255.255",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.169.254",
            "0.0.0.0",
        ] {
            assert!(is_always_denied(ip.parse().unwrap()), "{} should be denied", ip);
        }
        assert!(!is_always_denied("172.32.0.1".parse().unwrap()));
        assert!(!is_always_denied("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn test_always_denied_v6() {
        for ip in ["::1", "::", "fd00:ec2::254", "fe80::1", "::ffff:127.0.0.1"] {
            assert!(is_always_denied(ip.parse().unwrap()), "{} should be denied", ip);
        }
        assert!(!is_always_denied("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn test_domain_exact_and_wildcard() {
        assert!(domain_match("api.example.com", "API.example.com."));
        assert!(domain_match("*.example.com", "api.example.com"));
        assert!(domain_match("*.example.com", "a.b.example.com"));
        assert!(domain_match("*.example.com", "example.com"));
        assert!(!domain_match("*.example.com", "evilexample.com"));
        assert!(!domain_match("*.example.com", "example.com.evil.io"));
        assert!(domain_match("*", "anything.io"));
    }

    #[test]
    fn test_domain_nested_wildcards_never_match() {
        assert!(!domain_match("*.*.example.com", "a.b.example.com"));
        assert!(!domain_match("api.*.com", "api.example.com"));
        assert!(!is_valid_domain_pattern("*.*.example.com"));
        assert!(is_valid_domain_pattern("*.example.com"));
    }
}
