//! IDE-side tools a model may call.
//!
//! Every tool takes a flat string map and returns human-readable text. All
//! file access goes through [`Sandbox`], which refuses any path outside the
//! session root.

mod executor;
mod glob;
mod host;
mod registry;
mod sandbox;

pub use executor::{execute, ToolExecutor};
pub use glob::{compile_pattern, glob_to_regex};
pub use host::{LoggingHost, ToolHost};
pub use registry::{catalogue, find_tool, ToolArgs, ToolParam, ToolSpec, TOOLS};
pub use sandbox::Sandbox;

use indexmap::IndexMap;
use thiserror::Error;

/// A tool call as the model asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: IndexMap<String, String>,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required argument '{argument}' for {tool}")]
    MissingArgument { tool: String, argument: String },

    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("Path is outside the project root: {0}")]
    SandboxEscape(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return ToolError::NotFound(path.display().to_string());
        }
        ToolError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Text reported back to the model for a tool result.
pub fn result_text(result: &Result<String, ToolError>) -> String {
    match result {
        Ok(text) => text.clone(),
        Err(err) => format!("Error: {err}"),
    }
}
