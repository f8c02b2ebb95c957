//! Where Koog completions come from.
//!
//! A [`CompletionBackend`] turns a request into a stream of raw byte chunks;
//! the agent frames those into protocol lines. [`CommandBackend`] runs an
//! external program: the request goes to its stdin as one JSON line, the
//! completion is read from its stdout.

use crate::error::{AgentError, Result};
use crate::logging::{self, Direction, LogHandle};
use crate::shell::split_command_line;
use crate::spawn::{AgentProcess, SpawnConfig};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdout;
use uuid::Uuid;

pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion: system prompt plus the conversation, newest last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

pub trait CompletionBackend: Send + Sync {
    /// Start a completion. Must be called from within a tokio runtime.
    fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream>;
}

/// Runs a completion program per request.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    argv: Vec<String>,
    working_dir: PathBuf,
    log_dir: Option<PathBuf>,
}

impl CommandBackend {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            working_dir: working_dir.into(),
            log_dir: None,
        }
    }

    /// Tokenize `command` like a shell would.
    pub fn from_command_line(command: &str, working_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(split_command_line(command)?, working_dir))
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }
}

impl CompletionBackend for CommandBackend {
    fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let log = logging::open_log_file(
            self.log_dir.as_deref(),
            &format!("koog-{}", Uuid::new_v4()),
        );
        let config = SpawnConfig::new(self.argv.clone(), &self.working_dir)
            .label("koog")
            .log(log.clone());
        let mut process = AgentProcess::spawn(config)?;

        let payload = serde_json::to_string(request)
            .map_err(|e| AgentError::Protocol(format!("Cannot encode request: {e}")))?;
        logging::log_line(&log, Direction::Stdin, &payload);
        if let Some(mut stdin) = process.take_stdin() {
            tokio::spawn(async move {
                let written = async {
                    stdin.write_all(payload.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.shutdown().await
                };
                if let Err(err) = written.await {
                    log::warn!("[koog] Failed to send request: {err}");
                }
            });
        }

        let stdout = process
            .take_stdout()
            .ok_or_else(|| AgentError::Transport("completion command has no stdout".to_string()))?;
        Ok(read_chunks(stdout, process, log))
    }
}

struct Reader {
    stdout: ChildStdout,
    process: AgentProcess,
    log: LogHandle,
}

/// Chunks from stdout until EOF, then one error if the program failed.
/// Dropping the stream kills the program.
fn read_chunks(stdout: ChildStdout, process: AgentProcess, log: LogHandle) -> ChunkStream {
    let reader = Reader {
        stdout,
        process,
        log,
    };
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; 8192];
        match reader.stdout.read(&mut buf).await {
            Ok(0) => match reader.process.wait().await {
                Ok(exit) if exit.success() => None,
                Ok(exit) => Some((
                    Err(AgentError::Transport(format!(
                        "completion command exited with {exit}"
                    ))),
                    None,
                )),
                Err(err) => Some((Err(err), None)),
            },
            Ok(n) => {
                buf.truncate(n);
                logging::log_line(&reader.log, Direction::Stdout, &String::from_utf8_lossy(&buf));
                Some((Ok(buf), Some(reader)))
            }
            Err(err) => Some((Err(AgentError::Transport(err.to_string())), None)),
        }
    })
    .boxed()
}
