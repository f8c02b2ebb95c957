//! Koog backend: a plain completion stream carrying a line protocol.
//!
//! # Protocol Overview
//!
//! The model answers with newline-delimited JSON objects. `text` objects are
//! shown to the user, `tool` objects run an IDE tool:
//!
//! ```text
//! {"type":"text","content":"Reading the manifest."}
//! {"type":"tool","name":"view_file","arguments":{"path":"Cargo.toml"}}
//! ```
//!
//! Lines that are not JSON objects are shown as text.

mod agent;
mod backend;
mod parser;
mod prompt;
#[cfg(test)]
pub(crate) mod replay;
mod sanitize;

pub use agent::KoogAgentService;
pub use backend::{
    ChatMessage, ChunkStream, CommandBackend, CompletionBackend, CompletionRequest, Role,
};
pub use parser::{parse_line, KoogEvent, KoogFramer};
pub use prompt::system_prompt;
pub use sanitize::sanitize_json_line;
