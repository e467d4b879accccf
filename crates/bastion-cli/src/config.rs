//! CLI configuration via environment variables
//!
//! Flags that have an environment equivalent (`--profile`, `--policy`,
//! `--state-dir`, `--audit-log`, `--session`) are bound through clap's `env`
//! attribute. This module covers the settings that have no flag.

use std::env;
use std::path::PathBuf;

/// Default tracing filter when `BASTION_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch (BASTION_ENABLED, defaults to true)
    pub enabled: bool,
    /// Agent name recorded in audit entries (BASTION_AGENT)
    pub agent: Option<String>,
    /// Tracing filter directive (BASTION_LOG)
    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("BASTION_ENABLED")
                .map(|v| {
                    let lower = v.trim().to_lowercase();
                    !(lower == "0" || lower == "false" || lower == "off" || lower == "no")
                })
                .unwrap_or(true),
            agent: env::var("BASTION_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_filter: env::var("BASTION_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }

    /// Get the circuit breaker state directory
    ///
    /// Returns:
    /// 1. `<local data dir>/bastion/state` if a data directory exists
    /// 2. `~/.bastion/state` if a home directory exists
    /// 3. `<temp dir>/bastion-state` otherwise
    pub fn default_state_dir() -> PathBuf {
        if let Some(data) = dirs::data_local_dir() {
            return data.join("bastion").join("state");
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".bastion").join("state");
        }
        env::temp_dir().join("bastion-state")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear() {
        env::remove_var("BASTION_ENABLED");
        env::remove_var("BASTION_AGENT");
        env::remove_var("BASTION_LOG");
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear();

        let config = Config::from_env();
        assert!(config.enabled);
        assert!(config.agent.is_none());
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    #[serial]
    fn test_disabled_values() {
        clear();
        for value in ["0", "false", "OFF", "no"] {
            env::set_var("BASTION_ENABLED", value);
            assert!(!Config::from_env().enabled, "{}", value);
        }

        env::set_var("BASTION_ENABLED", "1");
        assert!(Config::from_env().enabled);
        clear();
    }

    #[test]
    #[serial]
    fn test_agent_and_log_filter() {
        clear();
        env::set_var("BASTION_AGENT", "reviewer");
        env::set_var("BASTION_LOG", "bastion_runtime=debug");

        let config = Config::from_env();
        assert_eq!(config.agent.as_deref(), Some("reviewer"));
        assert_eq!(config.log_filter, "bastion_runtime=debug");
        clear();
    }

    #[test]
    #[serial]
    fn test_blank_agent_is_ignored() {
        clear();
        env::set_var("BASTION_AGENT", "  ");
        assert!(Config::from_env().agent.is_none());
        clear();
    }

    #[test]
    fn test_default_state_dir_is_absolute_or_temp() {
        let dir = Config::default_state_dir();
        assert!(dir.ends_with("state") || dir.ends_with("bastion-state"));
    }
}
