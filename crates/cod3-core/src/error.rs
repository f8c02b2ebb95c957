//! Error taxonomy for agent sessions and turns.
//!
//! Tool failures have their own type ([`crate::tools::ToolError`]) because they
//! are reported back to the model as tool output instead of ending a turn.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Disabled feature, empty or unparsable command, spawn failure.
    #[error("{0}")]
    Configuration(String),

    /// Handshake or session negotiation failed after the process started.
    #[error("Failed to initialize agent: {0}")]
    Initialization(String),

    /// The peer answered with a JSON-RPC error or an unexpected shape.
    #[error("Agent protocol error: {0}")]
    Protocol(String),

    /// The process or its pipes went away.
    #[error("Agent connection closed: {0}")]
    Transport(String),

    /// The turn or session was cancelled. Never surfaced as a turn error.
    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_displays_message_verbatim() {
        let error = AgentError::Configuration("Agent command is not configured".to_string());
        assert_eq!(error.to_string(), "Agent command is not configured");
    }

    #[test]
    fn initialization_is_prefixed() {
        let error = AgentError::Initialization("initialize timed out".to_string());
        assert!(error.to_string().starts_with("Failed to initialize agent"));
        assert!(error.to_string().contains("initialize timed out"));
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(AgentError::Cancelled.is_cancellation());
        assert!(!AgentError::Transport("eof".to_string()).is_cancellation());
    }
}
