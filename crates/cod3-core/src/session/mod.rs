//! Session management for agent conversations.
//!
//! An [`AgentService`] is what a host talks to: it accepts prompts and
//! returns one [`EventStream`] per turn. The ACP service keeps a single
//! agent process alive across turns through the [`SessionManager`].

mod manager;
mod service;

pub use manager::SessionManager;
pub use service::AcpAgentService;

use crate::agents::turn::EventStream;

/// A backend that turns prompts into event streams.
///
/// Submitting a prompt cancels the turn that is still running, if any.
#[allow(async_fn_in_trait)]
pub trait AgentService {
    /// Start a turn. Failures before the turn can start arrive as a single
    /// `Error` event on the returned stream.
    async fn submit_prompt(&self, message: &str) -> EventStream;

    /// Cancel the running turn.
    async fn stop(&self);

    /// Cancel everything and release the backend's resources.
    async fn dispose(&self);
}
