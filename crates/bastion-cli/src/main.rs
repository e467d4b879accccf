use bastion_config::Profile;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::test_access::Access;
use commands::{Settings, EXIT_TOOL_ERROR};

/// Bastion security policy test surface.
///
/// Checks a policy file, or asks the authorization engine what it would
/// decide for a single request. Exactly one action flag is required.
///
/// EXIT CODES:
///     0    valid policy / approved / SAFE
///     1    tool error (unreadable or malformed policy, state errors)
///     2    invalid policy / denied / BLOCKED
///     3    NEEDS_APPROVAL (--classify only)
///
/// EXAMPLES:
///     bastion --validate .bastion/policy.json       Lint a policy file
///     bastion --test-read src/main.rs               Check a read
///     bastion --test-shell "git status"             Check a shell command
///     bastion --test-network https://pypi.org       Check a URL
///     bastion --classify "rm -rf /" --session s1    Classify a command
///
/// ENVIRONMENT VARIABLES:
///     BASTION_ENABLED     Set to '0' to allow everything (still audited)
///     BASTION_PROFILE     Profile override (development, testing, production)
///     BASTION_POLICY      Policy file to use instead of resolution
///     BASTION_STATE_DIR   Circuit breaker state directory
///     BASTION_AUDIT_LOG   JSONL audit log path
///     BASTION_SESSION_ID  Session id for the circuit breaker
///     BASTION_AGENT       Agent name recorded in audit entries
///     BASTION_LOG         Log filter (default: warn)
#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(version)]
#[command(verbatim_doc_comment)]
#[command(group(ArgGroup::new("action").required(true)))]
struct Cli {
    /// Lint a policy file (exit 0 valid, 2 invalid)
    #[arg(long, value_name = "POLICY", group = "action")]
    validate: Option<PathBuf>,

    /// Check a filesystem read
    #[arg(long, value_name = "PATH", group = "action")]
    test_read: Option<String>,

    /// Check a filesystem write
    #[arg(long, value_name = "PATH", group = "action")]
    test_write: Option<String>,

    /// Check a shell command (classifier, circuit breaker, then validator)
    #[arg(long, value_name = "CMD", group = "action", allow_hyphen_values = true)]
    test_shell: Option<String>,

    /// Check a network request
    #[arg(long, value_name = "URL", group = "action")]
    test_network: Option<String>,

    /// Check an environment variable read
    #[arg(long, value_name = "NAME", group = "action")]
    test_env: Option<String>,

    /// Classify a shell command (exit 0 SAFE, 2 BLOCKED, 3 NEEDS_APPROVAL)
    #[arg(long, value_name = "CMD", group = "action", allow_hyphen_values = true)]
    classify: Option<String>,

    /// Clear the circuit breaker state of a session
    #[arg(long, value_name = "ID", group = "action")]
    reset_session: Option<String>,

    /// Policy file to use instead of project/default resolution
    #[arg(long, value_name = "FILE", env = "BASTION_POLICY")]
    policy: Option<PathBuf>,

    /// Default policy used when the project has no override
    #[arg(long, value_name = "FILE")]
    default_policy: Option<PathBuf>,

    /// Project root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Profile override
    #[arg(long, env = "BASTION_PROFILE")]
    profile: Option<Profile>,

    /// Session id for the circuit breaker
    #[arg(long, env = "BASTION_SESSION_ID", default_value = "default")]
    session: String,

    /// Circuit breaker state directory
    #[arg(long, value_name = "DIR", env = "BASTION_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Append decisions to this JSONL audit log
    #[arg(long, value_name = "FILE", env = "BASTION_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Fall back to the built-in policy when a policy file is malformed
    #[arg(long)]
    graceful: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

enum Action {
    Validate(PathBuf),
    Test(Access, String),
    Classify(String),
    ResetSession(String),
}

impl Cli {
    /// Split the parsed flags into the requested action and shared settings
    fn into_parts(self, config: config::Config) -> Option<(Action, Settings)> {
        let action = if let Some(path) = self.validate {
            Action::Validate(path)
        } else if let Some(path) = self.test_read {
            Action::Test(Access::Read, path)
        } else if let Some(path) = self.test_write {
            Action::Test(Access::Write, path)
        } else if let Some(command) = self.test_shell {
            Action::Test(Access::Shell, command)
        } else if let Some(url) = self.test_network {
            Action::Test(Access::Network, url)
        } else if let Some(name) = self.test_env {
            Action::Test(Access::Env, name)
        } else if let Some(command) = self.classify {
            Action::Classify(command)
        } else {
            Action::ResetSession(self.reset_session?)
        };

        let settings = Settings {
            policy: self.policy,
            default_policy: self.default_policy,
            root: self.root,
            profile: self.profile,
            session: self.session,
            state_dir: self.state_dir,
            audit_log: self.audit_log,
            graceful: self.graceful,
            json: self.json,
            config,
        };

        Some((action, settings))
    }
}

fn init_tracing(filter: &str) {
    let filter =
        EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();
    init_tracing(&cli_config.log_filter);

    // The action group is required, so clap has already rejected a bare call
    let Some((action, settings)) = cli.into_parts(cli_config) else {
        eprintln!("error: no action given");
        return ExitCode::from(EXIT_TOOL_ERROR);
    };

    let result = match action {
        Action::Validate(path) => commands::validate::run(&path, settings.json),
        Action::Test(access, subject) => commands::test_access::run(access, &subject, &settings),
        Action::Classify(command) => commands::classify::run(&command, &settings),
        Action::ResetSession(session) => commands::reset::run(&session, &settings),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_TOOL_ERROR)
        }
    }
}
