//! Azure CLI command execution.
//!
//! Runs `az` commands as child processes and classifies their failures. The
//! logged-in `az` session is the credential handle for the whole tool.

use crate::cancel::{guarded, Cancel};
use crate::config;
use crate::error::{Error, Result};
use colored::Colorize;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

/// Regex for splitting command strings while preserving quoted substrings.
static COMMAND_REGEX: OnceLock<Regex> = OnceLock::new();
/// stderr patterns meaning the credential is missing or rejected.
static AUTH_REGEX: OnceLock<Regex> = OnceLock::new();
/// stderr patterns worth a retry.
static TRANSIENT_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_command_regex() -> &'static Regex {
    COMMAND_REGEX.get_or_init(|| {
        Regex::new(r#"'([^']*)'\s*|\"([^\"]*)\"\s*|([^'\s]*)\s*"#).expect("Invalid Regex")
    })
}

fn get_auth_regex() -> &'static Regex {
    AUTH_REGEX.get_or_init(|| {
        Regex::new(r"(?i)az login|AADSTS\d+|not logged in|authorizationfailed|refresh token has expired")
            .expect("Invalid Regex")
    })
}

fn get_transient_regex() -> &'static Regex {
    TRANSIENT_REGEX.get_or_init(|| {
        Regex::new(r"(?i)throttl|too many requests|\b429\b|\b503\b|timed out|temporarily unavailable|connection reset")
            .expect("Invalid Regex")
    })
}

/// Run a command string and return its stdout.
///
/// The command string is split on spaces, with quoted substrings preserved.
///
/// # Arguments
/// * `cmd` - The command string to execute
/// * `cancel` - Run-wide cancellation handle; the child is killed on cancel
/// * `deadline` - Upper bound for the call
pub async fn run(cmd: &str, cancel: &Cancel, deadline: Duration) -> Result<String> {
    let cmds: Vec<String> = split_and_strip(cmd).into_iter().map(str::to_string).collect();
    log::trace!("split cmds={:?}", cmds);
    let (program, args) = cmds
        .split_first()
        .ok_or_else(|| Error::InvalidInput("empty command".into()))?;
    run_args(program, args, cancel, deadline).await
}

/// Run `program` with pre-split `args` and return its stdout.
///
/// # Returns
/// * `Ok(String)` - The stdout output on success
/// * `Err(Error::Auth)` - stderr says the login is missing or expired
/// * `Err(Error::Transient)` - throttling and similar retryable failures
/// * `Err(Error::Connectivity)` - the program could not be started, or any other failure
pub async fn run_args(
    program: &str,
    args: &[String],
    cancel: &Cancel,
    deadline: Duration,
) -> Result<String> {
    let shown = format!("{program} {}", args.join(" "));
    log::debug!("run({cmd})", cmd = shown.on_blue());

    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = guarded(cancel, deadline, &shown, async {
        command.output().await.map_err(|e| {
            log::error!("Command execution failed: {}", e);
            Error::Connectivity {
                service: "azure cli",
                message: format!("failed to execute {program}: {e}"),
            }
        })
    })
    .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        log::trace!(
            "code={code:?}, status={status}\n┎######\nstderr=\n{stderr}\n┖######",
            code = output.status.code(),
            status = output.status,
            stderr = stderr.red()
        );
        log::warn!(
            "{failed} to run {cmd}",
            failed = "failed".on_red(),
            cmd = shown.on_blue()
        );
        return Err(classify_failure(&stderr));
    }

    log::debug!("Success output.stdout.len(): {}", output.stdout.len());
    if output.stdout.len() > config::MAX_CLI_OUTPUT_BYTES {
        return Err(Error::Transient(format!(
            "response too large: {} bytes for command: {shown}",
            output.stdout.len()
        )));
    }

    String::from_utf8(output.stdout).map_err(|e| Error::Parse(format!("invalid UTF-8: {e}")))
}

/// Map `az` stderr to an error kind.
pub fn classify_failure(stderr: &str) -> Error {
    let first_line = stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string();
    if get_auth_regex().is_match(stderr) {
        Error::Auth(first_line)
    } else if get_transient_regex().is_match(stderr) {
        Error::Transient(first_line)
    } else {
        Error::Connectivity {
            service: "azure cli",
            message: first_line,
        }
    }
}

/// Split a command string on spaces, preserving quoted substrings.
fn split_and_strip(input: &str) -> Vec<&str> {
    get_command_regex()
        .find_iter(input)
        .map(|m| m.as_str().trim().trim_matches('\'').trim_matches('"'))
        .filter(|s| !s.is_empty())
        .collect()
}
