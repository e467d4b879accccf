//! Test commands - ask the engine what it would decide for one request

use super::{Settings, EXIT_DENIED, EXIT_OK};
use anyhow::Result;
use bastion_config::Profile;
use bastion_runtime::Authorization;
use serde::Serialize;

/// Kind of request being tested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
    Shell,
    Network,
    Env,
}

#[derive(Serialize)]
struct Report<'a> {
    access: Access,
    subject: &'a str,
    profile: Profile,
    policy: String,
    #[serde(flatten)]
    authorization: &'a Authorization,
}

/// Run a single authorization and report it
///
/// Exits 0 only when the request is allowed. `NEEDS_APPROVAL` is not an
/// approval, so it exits 2 like a denial.
pub fn run(access: Access, subject: &str, settings: &Settings) -> Result<u8> {
    let (engine, source) = settings.engine()?;

    let authorization = match access {
        Access::Read => engine.authorize_fs_read(subject),
        Access::Write => engine.authorize_fs_write(subject),
        Access::Shell => engine.authorize_shell(subject, &settings.session),
        Access::Network => engine.authorize_network(subject),
        Access::Env => engine.authorize_env(subject),
    };

    if settings.json {
        let report = Report {
            access,
            subject,
            profile: engine.profile(),
            policy: source.to_string(),
            authorization: &authorization,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", describe(&authorization, engine.is_enabled()));
    }

    Ok(if authorization.is_allowed() {
        EXIT_OK
    } else {
        EXIT_DENIED
    })
}

fn describe(authorization: &Authorization, enabled: bool) -> String {
    if !enabled {
        return format!("{}: authorization disabled", authorization.decision);
    }

    match (&authorization.result, authorization.classification) {
        (Some(result), _) => format!("{}: {}", authorization.decision, result),
        (None, Some(classification)) => {
            format!("{}: classified {}", authorization.decision, classification)
        }
        (None, None) => authorization.decision.to_string(),
    }
}
