//! Authorization engine
//!
//! Wires the classifier, circuit breaker, validator, and audit logger into
//! a single decision per request. Configuration is passed in explicitly;
//! the engine never reads the process environment.

use crate::audit::{redact_command, redact_url, AuditEntry, AuditLogger, EventType};
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::permissions::{Layer, PermissionValidator, ValidationResult};
use crate::sandbox::{Classification, SandboxClassifier};
use bastion_config::{PolicyResult, Profile, SecurityPolicy};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Final verdict for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    NeedsApproval,
}

impl Decision {
    /// Map a validator result to a decision
    ///
    /// A request that only failed to match the whitelist goes to a human;
    /// anything a hardcoded layer or an explicit policy denial rejected is
    /// denied outright.
    pub fn from_result(result: &ValidationResult) -> Self {
        if result.approved() {
            Decision::Allow
        } else if result.layer() == Layer::Policy {
            Decision::NeedsApproval
        } else {
            Decision::Deny
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::NeedsApproval => "NEEDS_APPROVAL",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Classification> for Decision {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Safe => Decision::Allow,
            Classification::Blocked => Decision::Deny,
            Classification::NeedsApproval => Decision::NeedsApproval,
        }
    }
}

/// Outcome of one engine call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub decision: Decision,
    /// Validator result, when the validator was consulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
    /// Classifier verdict, for shell commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl Authorization {
    fn validated(result: ValidationResult) -> Self {
        Self {
            decision: Decision::from_result(&result),
            result: Some(result),
            classification: None,
        }
    }

    fn disabled() -> Self {
        Self {
            decision: Decision::Allow,
            result: None,
            classification: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Engine construction options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// When false every request is allowed (and still audited)
    pub enabled: bool,
    /// Profile override; defaults to the policy's profile
    pub profile: Option<Profile>,
    /// Project root for relative paths and rules
    pub root: PathBuf,
    /// Directory holding circuit breaker state
    pub state_dir: PathBuf,
    /// Agent name recorded in audit entries
    pub agent: Option<String>,
}

impl EngineOptions {
    pub fn new(root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            profile: None,
            root: root.into(),
            state_dir: state_dir.into(),
            agent: None,
        }
    }
}

const DISABLED_REASON: &str = "authorization disabled";

/// Authorization engine
pub struct Engine {
    enabled: bool,
    profile: Profile,
    agent: Option<String>,
    validator: PermissionValidator,
    classifier: SandboxClassifier,
    breaker: CircuitBreaker,
    audit: Arc<dyn AuditLogger>,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        policy: &SecurityPolicy,
        audit: Arc<dyn AuditLogger>,
    ) -> PolicyResult<Self> {
        let profile = options.profile.unwrap_or(policy.profile);
        let validator = PermissionValidator::for_profile(policy, &options.root, profile)?;
        let classifier = SandboxClassifier::new(profile, policy)?;
        let breaker = CircuitBreaker::for_profile(options.state_dir, profile);

        tracing::debug!(%profile, enabled = options.enabled, root = %validator.root().display(), "engine ready");

        Ok(Self {
            enabled: options.enabled,
            profile,
            agent: options.agent,
            validator,
            classifier,
            breaker,
            audit,
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn validator(&self) -> &PermissionValidator {
        &self.validator
    }

    pub fn classifier(&self) -> &SandboxClassifier {
        &self.classifier
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn authorize_fs_read(&self, path: &str) -> Authorization {
        self.authorize_with(EventType::FsRead, path.to_string(), || {
            self.validator.validate_fs_read(path)
        })
    }

    pub fn authorize_fs_write(&self, path: &str) -> Authorization {
        self.authorize_with(EventType::FsWrite, path.to_string(), || {
            self.validator.validate_fs_write(path)
        })
    }

    pub fn authorize_network(&self, url: &str) -> Authorization {
        self.authorize_with(EventType::NetworkAccess, redact_url(url), || {
            self.validator.validate_network_access(url)
        })
    }

    pub fn authorize_env(&self, name: &str) -> Authorization {
        self.authorize_with(EventType::EnvAccess, name.to_string(), || {
            self.validator.validate_env_access(name)
        })
    }

    fn authorize_with(
        &self,
        event_type: EventType,
        subject: String,
        validate: impl FnOnce() -> ValidationResult,
    ) -> Authorization {
        if !self.enabled {
            self.record(event_type, Decision::Allow, subject, Some(DISABLED_REASON));
            return Authorization::disabled();
        }

        let authorization = Authorization::validated(validate());
        let reason = authorization.result.as_ref().and_then(|r| r.reason());
        self.record(event_type, authorization.decision, subject, reason);
        authorization
    }

    /// Authorize a shell command
    ///
    /// The classifier decides `SAFE` and `BLOCKED` on its own while the
    /// session's breaker is intact. A `BLOCKED` verdict counts as a
    /// violation. Everything else, and every command once the breaker has
    /// tripped, goes to the validator, which denies the same destructive
    /// patterns as `DENIED_PATTERN`.
    pub fn authorize_shell(&self, command: &str, session_id: &str) -> Authorization {
        let subject = redact_command(command);

        if !self.enabled {
            self.record(EventType::ShellExecute, Decision::Allow, subject, Some(DISABLED_REASON));
            return Authorization::disabled();
        }

        let classification = self.gated_classification(command, session_id);

        let authorization = match classification {
            Classification::Safe => Authorization {
                decision: Decision::Allow,
                result: None,
                classification: Some(classification),
            },
            Classification::Blocked => {
                self.record_violation(session_id);
                Authorization {
                    decision: Decision::Deny,
                    result: None,
                    classification: Some(classification),
                }
            }
            Classification::NeedsApproval => {
                let result = self.validator.validate_shell_execute(command);
                Authorization {
                    decision: Decision::from_result(&result),
                    result: Some(result),
                    classification: Some(classification),
                }
            }
        };

        let reason = match (&authorization.result, classification) {
            (Some(result), _) => result.reason().map(str::to_string),
            (None, Classification::Safe) => Some("classified safe".to_string()),
            (None, _) => Some("blocked by command classifier".to_string()),
        };
        self.record(EventType::ShellExecute, authorization.decision, subject, reason);

        authorization
    }

    /// Classify a command without executing the validator
    pub fn classify(&self, command: &str, session_id: &str) -> Authorization {
        let classification = if self.enabled {
            self.gated_classification(command, session_id)
        } else {
            Classification::Safe
        };

        let reason = (!self.enabled).then_some(DISABLED_REASON);
        self.record(
            EventType::Classify,
            classification,
            redact_command(command),
            reason,
        );

        Authorization {
            decision: classification.into(),
            result: None,
            classification: Some(classification),
        }
    }

    /// Start a new session by clearing its breaker state
    pub fn reset_session(&self, session_id: &str) -> Result<(), BreakerError> {
        self.breaker.reset(session_id)?;
        self.record(
            EventType::SessionReset,
            "RESET",
            session_id.to_string(),
            None::<&str>,
        );
        Ok(())
    }

    /// Classifier verdict, or `NEEDS_APPROVAL` when the fast path is off
    fn gated_classification(&self, command: &str, session_id: &str) -> Classification {
        match self.breaker.state(session_id) {
            Ok(state) if state.tripped => {
                tracing::debug!(session = session_id, "circuit breaker tripped, skipping fast path");
                Classification::NeedsApproval
            }
            Ok(_) => self.classifier.classify(command),
            Err(e) => {
                tracing::warn!(error = %e, "circuit breaker unavailable, skipping fast path");
                Classification::NeedsApproval
            }
        }
    }

    fn record_violation(&self, session_id: &str) {
        match self.breaker.record_violation(session_id) {
            Ok(state) if state.tripped && state.violation_count == state.threshold => {
                self.record(
                    EventType::CircuitBreakerTripped,
                    "TRIPPED",
                    session_id.to_string(),
                    Some(format!(
                        "{} violations reached the {} threshold",
                        state.violation_count, self.profile
                    )),
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to record circuit breaker violation"),
        }
    }

    fn record(
        &self,
        event_type: EventType,
        decision: impl fmt::Display,
        subject: String,
        reason: Option<impl Into<String>>,
    ) {
        let entry = AuditEntry::new(event_type, decision, subject, self.profile)
            .with_reason(reason)
            .with_agent(self.agent.as_deref());
        self.audit.log(entry);
    }
}
