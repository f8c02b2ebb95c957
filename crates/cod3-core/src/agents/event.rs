//! Unified event type for both agent backends.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Lifecycle of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Unknown,
    Pending,
    Running,
    Completed,
    Failed,
    Declined,
}

impl ToolCallStatus {
    /// Parse a protocol status string. ACP uses `in_progress` for running.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" | "in_progress" | "inprogress" => Self::Running,
            "completed" | "complete" | "done" => Self::Completed,
            "failed" | "error" => Self::Failed,
            "declined" | "rejected" | "cancelled" => Self::Declined,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Declined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Declined => "declined",
        }
    }
}

/// Immutable copy of an in-flight tool call, safe to hand to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSnapshot {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: IndexMap<String, String>,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

impl ToolCallSnapshot {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("tool")
    }
}

/// Normalized output of a prompt turn.
///
/// `Completed` or `Error` ends the turn; a cancelled turn simply ends
/// without either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StreamEvent {
    /// Assistant text, to be appended in arrival order.
    ContentDelta { text: String },

    /// Progress of a tool call. `final` is set exactly once per id.
    ToolCallUpdate {
        snapshot: ToolCallSnapshot,
        #[serde(rename = "final")]
        is_final: bool,
    },

    /// The turn finished normally.
    Completed { text: String },

    /// The turn failed.
    Error { message: String },
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn tool(snapshot: ToolCallSnapshot, is_final: bool) -> Self {
        Self::ToolCallUpdate { snapshot, is_final }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// True for `Completed` and `Error`.
    pub fn ends_turn(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}
