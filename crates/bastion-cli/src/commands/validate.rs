//! Validate command - lint a policy file without authorizing anything

use super::{EXIT_DENIED, EXIT_OK};
use anyhow::Result;
use bastion_config::{Issue, PolicyError, PolicyStore, Profile};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Report<'a> {
    file: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<Profile>,
    issues: &'a [Issue],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Load and lint a policy file
///
/// Any load failure counts as an invalid policy. Warnings do not.
pub fn run(path: &Path, json: bool) -> Result<u8> {
    let (profile, issues, error) = match PolicyStore::load(path) {
        Ok(policy) => (Some(policy.profile), PolicyStore::validate(&policy), None),
        Err(PolicyError::Invalid { issues, .. }) => (None, issues, None),
        Err(e) => (None, Vec::new(), Some(e.to_string())),
    };

    let report = Report {
        file: path.display().to_string(),
        valid: profile.is_some(),
        profile,
        issues: &issues,
        error,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.valid { EXIT_OK } else { EXIT_DENIED })
}

fn print_report(report: &Report<'_>) {
    if report.valid {
        let warnings = report.issues.len();
        match warnings {
            0 => println!("{}: valid", report.file),
            1 => println!("{}: valid (1 warning)", report.file),
            n => println!("{}: valid ({} warnings)", report.file, n),
        }
        for issue in report.issues {
            println!("  {}", issue);
        }
        return;
    }

    if let Some(error) = &report.error {
        eprintln!("{}: {}", report.file, error);
    }
    for issue in report.issues {
        eprintln!("{}: {}", report.file, issue);
    }
    eprintln!("{}: invalid", report.file);
}
