//! Command-line handling for agent launches.
//!
//! Agent commands are configured as a single string and tokenized with POSIX
//! shell rules (`shlex`), then executed directly without an intermediate
//! shell so that nothing in the string is expanded.

use crate::error::{AgentError, Result};
use std::path::Path;
use std::process::ExitStatus;
use tokio::process::Command;

/// Exit status of an agent or completion process.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AgentExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl AgentExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for AgentExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for AgentExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Split a configured command line into program and arguments.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    if line.trim().is_empty() {
        return Err(AgentError::Configuration(
            "Agent command is not configured.".to_string(),
        ));
    }
    match shlex::split(line) {
        Some(parts) if !parts.is_empty() => Ok(parts),
        Some(_) => Err(AgentError::Configuration(
            "Agent command is not configured.".to_string(),
        )),
        None => Err(AgentError::Configuration(format!(
            "Unable to parse agent command: {line}"
        ))),
    }
}

/// Render argv back into a copy-pasteable command line for logs.
pub fn display_command(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

/// Prepend the binary's parent directory to PATH so node/etc. are found.
pub fn prepare_path_env(cmd: &mut Command, binary_path: &str) {
    if !binary_path.contains('/') {
        return;
    }
    if let Some(dir) = Path::new(binary_path).parent().and_then(Path::to_str) {
        if dir.is_empty() {
            return;
        }
        let existing = std::env::var("PATH").unwrap_or_default();
        let combined = if existing.is_empty() {
            dir.to_string()
        } else {
            format!("{dir}:{existing}")
        };
        cmd.env("PATH", combined);
    }
}

/// Build a tokio command for `argv` running in `working_dir`.
pub fn build_command(argv: &[String], working_dir: &Path) -> Result<Command> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        AgentError::Configuration("Agent command is not configured.".to_string())
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(working_dir);
    prepare_path_env(&mut cmd, program);
    Ok(cmd)
}
