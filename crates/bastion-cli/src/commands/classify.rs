//! Classify command - run only the sandbox classifier

use super::{Settings, EXIT_DENIED, EXIT_NEEDS_APPROVAL, EXIT_OK};
use anyhow::Result;
use bastion_runtime::Classification;

/// Classify a command for the configured session
///
/// Honors a tripped circuit breaker but never counts a violation.
pub fn run(command: &str, settings: &Settings) -> Result<u8> {
    let (engine, _) = settings.engine()?;
    let classification = engine
        .classify(command, &settings.session)
        .classification
        .unwrap_or(Classification::NeedsApproval);

    if settings.json {
        println!(
            "{}",
            serde_json::json!({
                "classification": classification,
                "profile": engine.profile(),
                "session": settings.session,
            })
        );
    } else {
        println!("{}", classification);
    }

    Ok(match classification {
        Classification::Safe => EXIT_OK,
        Classification::Blocked => EXIT_DENIED,
        Classification::NeedsApproval => EXIT_NEEDS_APPROVAL,
    })
}
