//! Prompt service over the shared ACP session.

use super::manager::SessionManager;
use super::AgentService;
use crate::agents::acp::AcpSessionOptions;
use crate::agents::event::StreamEvent;
use crate::agents::turn::{EventStream, TurnSlot};
use crate::approval::{ApprovalBroker, PermissionGate};
use crate::config::AgentSettings;
use crate::error::AgentError;
use crate::tools::ToolHost;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sends prompts to the configured ACP agent, one turn at a time.
pub struct AcpAgentService {
    settings: AgentSettings,
    project_base: Option<PathBuf>,
    gate: PermissionGate,
    manager: Arc<SessionManager>,
    slot: TurnSlot,
    scope: CancellationToken,
}

impl AcpAgentService {
    pub fn new(settings: AgentSettings, project_base: Option<PathBuf>) -> Self {
        let options = AcpSessionOptions {
            log_dir: settings.log_dir(),
            ..AcpSessionOptions::default()
        };
        Self {
            gate: PermissionGate::new(settings.permission_mode),
            manager: Arc::new(SessionManager::new(options)),
            settings,
            project_base,
            slot: TurnSlot::new(),
            scope: CancellationToken::new(),
        }
    }

    /// Route `ConfirmEachCall` decisions to a human.
    pub fn with_broker(mut self, broker: ApprovalBroker) -> Self {
        self.gate = self.gate.with_broker(broker);
        self
    }

    /// Present written files and diffs through `host`.
    pub fn with_host(mut self, host: Arc<dyn ToolHost>) -> Self {
        let options = AcpSessionOptions {
            log_dir: self.settings.log_dir(),
            host,
        };
        self.manager = Arc::new(SessionManager::new(options));
        self
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }
}

impl AgentService for AcpAgentService {
    async fn submit_prompt(&self, message: &str) -> EventStream {
        let spec = match self.settings.resolve(self.project_base.as_deref()) {
            Ok(spec) => spec,
            Err(err) => {
                log::warn!("[session] Cannot start agent: {err}");
                return EventStream::single(StreamEvent::error(err.to_string()));
            }
        };

        let manager = Arc::clone(&self.manager);
        let gate = self.gate.clone();
        let message = message.to_string();
        self.slot
            .start(&self.scope, move |sink, cancel| async move {
                let session = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    session = manager.ensure_session(&spec) => session?,
                };
                session.prompt(&message, &sink, &gate, &cancel).await
            })
            .await
    }

    async fn stop(&self) {
        self.slot.stop().await;
    }

    async fn dispose(&self) {
        self.scope.cancel();
        self.slot.stop().await;
        self.manager.dispose().await;
    }
}
