//! One-shot approval requests handed to whoever renders the prompt.
//!
//! The gate creates a [`PendingApproval`] holding a oneshot sender, pushes it
//! to the host through an unbounded channel and awaits the receiver. The host
//! resolves it exactly once; dropping it counts as a decline.

use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub arguments: IndexMap<String, String>,
}

impl ApprovalRequest {
    /// Single-line summary for terminal or status-bar prompts.
    pub fn summary(&self) -> String {
        if self.arguments.is_empty() {
            return self.tool_name.clone();
        }
        let args = self
            .arguments
            .iter()
            .map(|(key, value)| {
                let value = value.lines().next().unwrap_or_default();
                if value.chars().count() > 60 {
                    let short: String = value.chars().take(57).collect();
                    format!("{key}={short}...")
                } else {
                    format!("{key}={value}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} ({})", self.tool_name, args)
    }
}

/// The user's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAnswer {
    Allow,
    /// Allow, and stop asking for this tool for the rest of the service's life.
    AllowAlways,
    Decline,
}

impl ApprovalAnswer {
    pub fn is_allowed(self) -> bool {
        !matches!(self, ApprovalAnswer::Decline)
    }
}

/// An approval waiting for the user.
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalAnswer>,
}

impl PendingApproval {
    pub fn respond(self, answer: ApprovalAnswer) {
        log::info!("Approval for {}: {:?}", self.request.tool_name, answer);
        // The waiting turn may already be gone.
        let _ = self.responder.send(answer);
    }

    pub fn approve(self) {
        self.respond(ApprovalAnswer::Allow);
    }

    pub fn approve_always(self) {
        self.respond(ApprovalAnswer::AllowAlways);
    }

    pub fn decline(self) {
        self.respond(ApprovalAnswer::Decline);
    }

    /// True once the requesting turn stopped waiting (cancelled or finished).
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }
}

/// Sending half of the approval channel, held by the permission gate.
#[derive(Debug, Clone)]
pub struct ApprovalBroker {
    tx: mpsc::UnboundedSender<PendingApproval>,
}

impl ApprovalBroker {
    /// Create a broker and the receiver the host drains to show prompts.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PendingApproval>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Ask the host and wait for the answer.
    ///
    /// Returns `None` when nobody is listening, the pending approval was
    /// dropped, or `cancel` fired first.
    pub async fn request(
        &self,
        request: ApprovalRequest,
        cancel: &CancellationToken,
    ) -> Option<ApprovalAnswer> {
        let (responder, receiver) = oneshot::channel();
        if self.tx.send(PendingApproval { request, responder }).is_err() {
            return None;
        }

        tokio::select! {
            _ = cancel.cancelled() => None,
            answer = receiver => answer.ok(),
        }
    }
}
