//! ACP backend: an external coding agent spoken to over JSON-RPC.
//!
//! # Example Usage
//!
//! ```ignore
//! use cod3_core::agents::acp::{AcpSession, AcpSessionOptions};
//!
//! let session = AcpSession::open(spec, AcpSessionOptions::default()).await?;
//! let text = session.prompt("Explain main.rs", &sink, &gate, &cancel).await?;
//! session.close().await;
//! ```

mod client;
mod connection;
#[cfg(all(test, unix))]
pub(crate) mod fake;
mod parser;
mod types;

pub use client::{AcpSession, AcpSessionOptions};
pub use connection::{AcpConnection, Inbound};
pub use parser::{content_texts, parse_session_update, AcpUpdate};
pub use types::*;
