//! Bastion Runtime
//!
//! Decides whether a requested operation may proceed.
//!
//! # Overview
//!
//! A request flows through up to four components:
//! - **SandboxClassifier**: fast pre-filter for shell commands
//!   (`SAFE` / `BLOCKED` / `NEEDS_APPROVAL`)
//! - **CircuitBreaker**: per-session violation counter persisted on disk;
//!   once tripped, the classifier's fast path is skipped for that session
//! - **PermissionValidator**: the authoritative, layered check for paths,
//!   commands, URLs, and environment variables
//! - **AuditLogger**: records every final decision as a JSON line
//!
//! The [`Engine`] wires these together.
//!
//! # Example
//!
//! ```no_run
//! use bastion_config::SecurityPolicy;
//! use bastion_runtime::{Decision, Engine, EngineOptions, NullAuditLogger};
//! use std::sync::Arc;
//!
//! let policy = SecurityPolicy::from_json(
//!     r#"{ "version": "1.0", "profile": "development", "filesystem": { "read": ["src/**"] } }"#,
//! )
//! .unwrap();
//! let options = EngineOptions::new(".", "/tmp/bastion-state");
//! let engine = Engine::new(options, &policy, Arc::new(NullAuditLogger::new())).unwrap();
//!
//! assert_eq!(engine.authorize_fs_read("src/main.rs").decision, Decision::Allow);
//! assert_eq!(engine.authorize_fs_read(".env").decision, Decision::Deny);
//! ```

pub mod audit;
pub mod breaker;
pub mod engine;
pub mod paths;
pub mod permissions;
pub mod sandbox;

pub use audit::{
    AuditEntry, AuditLogger, EventType, JsonlAuditLogger, MemoryAuditLogger, NullAuditLogger,
};
pub use breaker::{BreakerError, CircuitBreaker, CircuitBreakerState};
pub use engine::{Authorization, Decision, Engine, EngineOptions};
pub use permissions::{Layer, PermissionValidator, ValidationResult};
pub use sandbox::{Classification, SandboxClassifier};
