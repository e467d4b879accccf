//! CLI actions

pub mod classify;
pub mod reset;
pub mod test_access;
pub mod validate;

use crate::config::Config;
use anyhow::{Context, Result};
use bastion_config::{PolicySource, PolicyStore, Profile, ResolvedPolicy};
use bastion_runtime::{AuditLogger, Engine, EngineOptions, JsonlAuditLogger, NullAuditLogger};
use std::path::PathBuf;
use std::sync::Arc;

/// Valid policy, approved request, or `SAFE`
pub const EXIT_OK: u8 = 0;
/// The tool itself failed
pub const EXIT_TOOL_ERROR: u8 = 1;
/// Invalid policy, denied request, or `BLOCKED`
pub const EXIT_DENIED: u8 = 2;
/// `NEEDS_APPROVAL` from `--classify`
pub const EXIT_NEEDS_APPROVAL: u8 = 3;

/// Settings shared by every engine-backed action
#[derive(Debug, Clone)]
pub struct Settings {
    pub policy: Option<PathBuf>,
    pub default_policy: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub profile: Option<Profile>,
    pub session: String,
    pub state_dir: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub graceful: bool,
    pub json: bool,
    pub config: Config,
}

impl Settings {
    /// Project root, defaulting to the current directory
    pub fn root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().context("Failed to determine current directory"),
        }
    }

    /// Load the active policy
    ///
    /// An explicit `--policy` file replaces the whole resolution chain.
    /// Otherwise the project override, the default policy, and the built-in
    /// policy are tried in that order. `--graceful` turns a broken policy
    /// file into the built-in policy instead of an error.
    pub fn load_policy(&self) -> Result<ResolvedPolicy> {
        let root = self.root()?;

        let mut store = match &self.default_policy {
            Some(path) => PolicyStore::with_default(path),
            None => PolicyStore::new(),
        };
        if let Some(path) = &self.policy {
            store = store.explicit(path);
        }

        if self.graceful {
            Ok(store.resolve_graceful(&root))
        } else {
            store.resolve(&root).context("Failed to load security policy")
        }
    }

    /// Build an engine from the resolved policy
    pub fn engine(&self) -> Result<(Engine, PolicySource)> {
        let resolved = self.load_policy()?;
        tracing::debug!(source = %resolved.source, "policy resolved");

        let options = EngineOptions {
            enabled: self.config.enabled,
            profile: self.profile,
            root: self.root()?,
            state_dir: self
                .state_dir
                .clone()
                .unwrap_or_else(Config::default_state_dir),
            agent: self.config.agent.clone(),
        };

        let audit: Arc<dyn AuditLogger> = match &self.audit_log {
            Some(path) => Arc::new(JsonlAuditLogger::new(path)),
            None => Arc::new(NullAuditLogger::new()),
        };

        let engine =
            Engine::new(options, &resolved.policy, audit).context("Failed to initialize engine")?;
        Ok((engine, resolved.source))
    }
}
