//! # cod3-core
//!
//! Core engine for Cod3, an AI coding assistant.
//!
//! This crate is host-agnostic and can be driven by:
//! - the `cod3` command-line daemon
//! - an editor integration through [`tools::ToolHost`] and
//!   [`approval::ApprovalBroker`]
//!
//! ## Key Concepts
//!
//! - **Turn**: A prompt and the agent's complete response stream
//! - **StreamEvent**: Unified event type across both backends
//! - **Tool call**: A model's request to run an IDE tool, merged by id
//! - **Sandbox root**: The directory every tool is confined to

pub mod agents;
pub mod approval;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod session;
pub mod shell;
pub mod spawn;
pub mod tools;

// Re-export commonly used types
pub use agents::event::{StreamEvent, ToolCallSnapshot, ToolCallStatus};
pub use agents::turn::EventStream;
pub use approval::{PermissionGate, PermissionMode};
pub use config::{AgentSettings, LaunchSpec};
pub use error::{AgentError, Result};
pub use session::{AcpAgentService, AgentService, SessionManager};
