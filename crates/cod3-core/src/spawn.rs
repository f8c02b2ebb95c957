//! Agent process spawning and lifecycle.
//!
//! Both backends run an external program: the ACP agent speaks JSON-RPC over
//! stdio, the Koog completion command streams text on stdout. This module
//! owns the child process:
//! - spawning it directly (no intermediate shell) with piped stdio
//! - forwarding stderr to the log, line by line, dropping blank lines
//! - stopping it (SIGINT on Unix, then force kill)
//!
//! Stdout and stdin are handed to the protocol layer with [`AgentProcess::take_stdio`].

use crate::error::{AgentError, Result};
use crate::logging::{self, Direction, LogHandle};
use crate::shell::{build_command, display_command, AgentExit};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

/// How long a process gets to exit after SIGINT before it is killed.
const GRACEFUL_STOP: Duration = Duration::from_secs(3);

/// Configuration for spawning an agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    /// Short name used as log context, e.g. `acp` or `koog`.
    pub label: String,
    pub log: LogHandle,
}

impl SpawnConfig {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            working_dir: working_dir.into(),
            label: "agent".to_string(),
            log: logging::disabled(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Mirror stderr into a session transcript.
    pub fn log(mut self, log: LogHandle) -> Self {
        self.log = log;
        self
    }
}

/// A running agent process.
pub struct AgentProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    label: String,
    exit: Option<AgentExit>,
}

impl AgentProcess {
    /// Spawn a new agent process and start forwarding its stderr.
    ///
    /// Must be called from within a tokio runtime. A spawn failure is a
    /// configuration problem (wrong path, missing binary).
    pub fn spawn(config: SpawnConfig) -> Result<Self> {
        let mut cmd = build_command(&config.argv, &config.working_dir)?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_line = display_command(&config.argv);
        let mut child = cmd.spawn().map_err(|e| {
            AgentError::Configuration(format!("Failed to start agent `{command_line}`: {e}"))
        })?;
        log::info!(
            "[{}] Spawned `{}` in {} (pid {:?})",
            config.label,
            command_line,
            config.working_dir.display(),
            child.id()
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr_task = child.stderr.take().map(|stderr| {
            let label = config.label.clone();
            let log = config.log.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    log::warn!("[{label}] stderr: {line}");
                    logging::log_line(&log, Direction::Stderr, &line);
                }
            })
        });

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr_task,
            label: config.label,
            exit: None,
        })
    }

    /// Hand the stdio pipes to the protocol layer. Only the first call
    /// returns them.
    pub fn take_stdio(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        Some((self.stdin.take()?, self.stdout.take()?))
    }

    /// Take only stdout, for processes that read nothing from stdin.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status.into());
                false
            }
            Ok(None) => true,
            Err(err) => {
                log::warn!("[{}] Cannot poll process: {}", self.label, err);
                false
            }
        }
    }

    /// Wait for the process to exit, then for its stderr to drain.
    pub async fn wait(&mut self) -> Result<AgentExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        self.stdin.take();
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| AgentError::Transport(format!("wait failed: {e}")))?;
        let exit = AgentExit::from(status);
        self.exit = Some(exit.clone());
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        Ok(exit)
    }

    /// Stop the process gracefully (SIGINT on Unix, then force kill).
    ///
    /// Safe to call repeatedly. Failures are logged, never returned.
    pub async fn stop(&mut self) -> Option<AgentExit> {
        self.stdin.take();
        if !self.is_running() {
            self.finish_stderr();
            return self.exit.clone();
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: plain signal delivery to a pid we spawned and still own.
                unsafe {
                    libc::kill(pid as i32, libc::SIGINT);
                }
                if let Ok(Ok(status)) =
                    tokio::time::timeout(GRACEFUL_STOP, self.child.wait()).await
                {
                    self.exit = Some(status.into());
                    log::info!("[{}] Stopped ({})", self.label, status);
                    self.finish_stderr();
                    return self.exit.clone();
                }
            }
        }

        if let Err(err) = self.child.kill().await {
            log::warn!("[{}] Failed to kill process: {}", self.label, err);
        }
        self.exit = self.child.try_wait().ok().flatten().map(AgentExit::from);
        log::info!("[{}] Killed", self.label);
        self.finish_stderr();
        self.exit.clone()
    }

    fn finish_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; the forwarder must not outlive it.
        self.finish_stderr();
    }
}
