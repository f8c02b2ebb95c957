//! Koog turn driver.
//!
//! Streams a completion through [`KoogFramer`], forwards text as it arrives
//! and runs every requested tool on its own task. Each tool call gets a
//! fresh id, a `running` update when it is parsed and a final update when
//! its task ends; the turn completes only after all of them have.

use super::backend::{ChatMessage, CompletionBackend, CompletionRequest};
use super::parser::{KoogEvent, KoogFramer};
use super::prompt::system_prompt;
use crate::agents::accumulator::{ToolCallAccumulator, ToolEventUpdate};
use crate::agents::event::ToolCallStatus;
use crate::agents::turn::{EventStream, TurnSink, TurnSlot};
use crate::approval::{ApprovalBroker, PermissionGate, PermissionMode, DECLINED_NOTICE};
use crate::error::{AgentError, Result};
use crate::session::AgentService;
use crate::tools::{result_text, ToolExecutor, ToolHost, ToolInvocation};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct KoogAgentService {
    backend: Arc<dyn CompletionBackend>,
    executor: ToolExecutor,
    gate: PermissionGate,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    slot: TurnSlot,
    scope: CancellationToken,
}

impl KoogAgentService {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        sandbox_root: impl AsRef<Path>,
        mode: PermissionMode,
    ) -> Self {
        Self {
            backend,
            executor: ToolExecutor::new(sandbox_root),
            gate: PermissionGate::new(mode),
            history: Arc::new(Mutex::new(Vec::new())),
            slot: TurnSlot::new(),
            scope: CancellationToken::new(),
        }
    }

    pub fn with_broker(mut self, broker: ApprovalBroker) -> Self {
        self.gate = self.gate.with_broker(broker);
        self
    }

    pub fn with_host(mut self, host: Arc<dyn ToolHost>) -> Self {
        self.executor = self.executor.with_host(host);
        self
    }

    /// Completed exchanges, oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

impl AgentService for KoogAgentService {
    async fn submit_prompt(&self, message: &str) -> EventStream {
        let mut messages = self.history();
        messages.push(ChatMessage::user(message));
        let request = CompletionRequest {
            system: system_prompt(self.executor.root()),
            messages,
        };

        let turn = Turn {
            backend: Arc::clone(&self.backend),
            executor: self.executor.clone(),
            gate: self.gate.clone(),
        };
        let history = Arc::clone(&self.history);
        let message = message.to_string();
        self.slot
            .start(&self.scope, move |sink, cancel| async move {
                let text = turn.run(&request, &sink, &cancel).await?;
                if let Ok(mut history) = history.lock() {
                    history.push(ChatMessage::user(message));
                    history.push(ChatMessage::assistant(text.clone()));
                }
                Ok(text)
            })
            .await
    }

    async fn stop(&self) {
        self.slot.stop().await;
    }

    async fn dispose(&self) {
        self.scope.cancel();
        self.slot.stop().await;
    }
}

/// What one turn needs, detached from the service.
struct Turn {
    backend: Arc<dyn CompletionBackend>,
    executor: ToolExecutor,
    gate: PermissionGate,
}

impl Turn {
    async fn run(
        &self,
        request: &CompletionRequest,
        sink: &TurnSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let short = sink.id().short().to_string();
        let mut chunks = self.backend.stream(request)?;

        let (parsed_tx, mut parsed_rx) = mpsc::unbounded_channel();
        let mut framer = KoogFramer::new(move |event| {
            let _ = parsed_tx.send(event);
        });
        let mut accumulator = ToolCallAccumulator::new();
        let mut tasks: JoinSet<ToolEventUpdate> = JoinSet::new();
        let mut lines: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(abandon(&short, &mut accumulator, &mut tasks).await);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    publish_joined(joined, &mut accumulator, sink);
                }
                chunk = chunks.next() => {
                    let finished = chunk.is_none();
                    match chunk {
                        Some(Ok(bytes)) => framer.append_bytes(&bytes),
                        Some(Err(err)) => {
                            tasks.abort_all();
                            return Err(err);
                        }
                        None => framer.finish(),
                    }
                    while let Ok(event) = parsed_rx.try_recv() {
                        self.dispatch(
                            event,
                            sink,
                            cancel,
                            &mut accumulator,
                            &mut tasks,
                            &mut lines,
                        );
                    }
                    if finished {
                        break;
                    }
                }
            }
        }

        while !tasks.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(abandon(&short, &mut accumulator, &mut tasks).await);
                }
                Some(joined) = tasks.join_next() => publish_joined(joined, &mut accumulator, sink),
            }
        }

        Ok(lines.join("\n"))
    }

    fn dispatch(
        &self,
        event: KoogEvent,
        sink: &TurnSink,
        cancel: &CancellationToken,
        accumulator: &mut ToolCallAccumulator,
        tasks: &mut JoinSet<ToolEventUpdate>,
        lines: &mut Vec<String>,
    ) {
        match event {
            KoogEvent::Text(text) => {
                sink.content(text.clone());
                lines.push(text);
            }
            KoogEvent::Tool { name, arguments } => {
                let id = Uuid::new_v4().to_string();
                let running = ToolEventUpdate::new(&id)
                    .status(ToolCallStatus::Running)
                    .raw_input(json!({ "name": name, "arguments": arguments }));
                publish(running, accumulator, sink);

                let invocation = ToolInvocation { name, arguments };
                tasks.spawn(run_tool(
                    id,
                    invocation,
                    self.executor.clone(),
                    self.gate.clone(),
                    cancel.child_token(),
                ));
            }
        }
    }
}

/// Gate, then execute one tool call off the async threads.
async fn run_tool(
    id: String,
    invocation: ToolInvocation,
    executor: ToolExecutor,
    gate: PermissionGate,
    cancel: CancellationToken,
) -> ToolEventUpdate {
    let decision = gate
        .should_execute(&invocation.name, &invocation.arguments, None, &cancel)
        .await;
    if !decision.allowed {
        let notice = decision.notice.unwrap_or_else(|| DECLINED_NOTICE.to_string());
        return ToolEventUpdate::new(id)
            .status(ToolCallStatus::Declined)
            .raw_output(Value::String(notice));
    }

    let ToolInvocation { name, arguments } = invocation;
    let outcome = tokio::task::spawn_blocking(move || executor.execute(&name, &arguments)).await;
    let (status, text) = match outcome {
        Ok(result) => {
            let status = if result.is_ok() {
                ToolCallStatus::Completed
            } else {
                ToolCallStatus::Failed
            };
            (status, result_text(&result))
        }
        Err(err) => (ToolCallStatus::Failed, format!("Error: {err}")),
    };
    ToolEventUpdate::new(id)
        .status(status)
        .raw_output(Value::String(text))
}

fn publish(update: ToolEventUpdate, accumulator: &mut ToolCallAccumulator, sink: &TurnSink) {
    if let Some((snapshot, is_final)) = accumulator.on_tool_event(update) {
        sink.tool(snapshot, is_final);
    }
}

fn publish_joined(
    joined: std::result::Result<ToolEventUpdate, tokio::task::JoinError>,
    accumulator: &mut ToolCallAccumulator,
    sink: &TurnSink,
) {
    match joined {
        Ok(update) => publish(update, accumulator, sink),
        Err(err) => log::error!("[koog] Tool task ended abnormally: {err}"),
    }
}

/// Stop every tool task and wait until they are gone, so pending approvals
/// are released before the turn ends.
async fn abandon(
    turn: &str,
    accumulator: &mut ToolCallAccumulator,
    tasks: &mut JoinSet<ToolEventUpdate>,
) -> AgentError {
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    let dropped = accumulator.drain_unfinished();
    if !dropped.is_empty() {
        log::info!("[koog {turn}] Dropping unfinished tool calls {dropped:?}");
    }
    AgentError::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::koog::replay::ReplayBackend;
    use crate::agents::event::StreamEvent;
    use crate::approval::CHAT_MODE_NOTICE;
    use tempfile::tempdir;

    fn finals(events: &[StreamEvent]) -> Vec<&crate::agents::event::ToolCallSnapshot> {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ToolCallUpdate {
                    snapshot,
                    is_final: true,
                } => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    mod streaming {
        use super::*;

        #[tokio::test]
        async fn text_and_tool_call_complete_the_turn() {
            let dir = tempdir().unwrap();
            let backend = ReplayBackend::lines(&[
                r#"{"type":"text","content":"Writing the file."}"#,
                r#"{"type":"tool","name":"write_file","arguments":{"path":"notes.txt","content":"hi"}}"#,
                "All done.",
            ]);
            let service = KoogAgentService::new(backend, dir.path(), PermissionMode::AutoApprove);

            let events = service.submit_prompt("write notes").await.collect_all().await;

            assert_eq!(events[0], StreamEvent::content("Writing the file."));
            let StreamEvent::ToolCallUpdate { snapshot, is_final: false } = &events[1] else {
                panic!("expected running update, got {:?}", events[1]);
            };
            assert_eq!(snapshot.status, ToolCallStatus::Running);
            assert_eq!(snapshot.name.as_deref(), Some("write_file"));
            assert_eq!(snapshot.arguments["path"], "notes.txt");

            let done = finals(&events);
            assert_eq!(done.len(), 1);
            assert_eq!(done[0].id, snapshot.id);
            assert_eq!(done[0].status, ToolCallStatus::Completed);
            assert_eq!(done[0].output, vec!["Wrote 2 bytes to notes.txt"]);

            assert_eq!(
                events.last(),
                Some(&StreamEvent::Completed {
                    text: "Writing the file.\nAll done.".to_string()
                })
            );
            assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "hi");
        }

        #[tokio::test]
        async fn byte_chunking_does_not_change_events() {
            let dir = tempdir().unwrap();
            let body = "{\"type\":\"text\",\"content\":\"caf\u{e9} \\u00e9\"}\nplain tail";
            let backend = ReplayBackend::chunked(body.as_bytes(), 3);
            let service = KoogAgentService::new(backend, dir.path(), PermissionMode::Chat);

            let events = service.submit_prompt("hi").await.collect_all().await;
            assert_eq!(
                events,
                vec![
                    StreamEvent::content("caf\u{e9} \u{e9}"),
                    StreamEvent::content("plain tail"),
                    StreamEvent::Completed {
                        text: "caf\u{e9} \u{e9}\nplain tail".to_string()
                    },
                ]
            );
        }

        #[tokio::test]
        async fn tool_errors_become_failed_output() {
            let dir = tempdir().unwrap();
            let backend = ReplayBackend::lines(&[
                r#"{"type":"tool","name":"shred_disk","arguments":{}}"#,
                r#"{"type":"tool","name":"view_file","arguments":{"path":"../etc/passwd"}}"#,
            ]);
            let service = KoogAgentService::new(backend, dir.path(), PermissionMode::AutoApprove);

            let events = service.submit_prompt("go").await.collect_all().await;
            let done = finals(&events);
            assert_eq!(done.len(), 2);
            for snapshot in done {
                assert_eq!(snapshot.status, ToolCallStatus::Failed);
                assert!(snapshot.output[0].starts_with("Error: "), "{:?}", snapshot.output);
            }
            assert!(matches!(events.last(), Some(StreamEvent::Completed { .. })));
        }

        #[tokio::test]
        async fn backend_failure_is_one_error_event() {
            let dir = tempdir().unwrap();
            let backend = ReplayBackend::failing(
                &[r#"{"type":"text","content":"partial"}"#],
                "model crashed",
            );
            let service = KoogAgentService::new(backend, dir.path(), PermissionMode::Chat);

            let events = service.submit_prompt("go").await.collect_all().await;
            assert_eq!(events[0], StreamEvent::content("partial"));
            assert!(matches!(
                &events[1],
                StreamEvent::Error { message } if message.contains("model crashed")
            ));
            assert_eq!(events.len(), 2);
        }

        #[tokio::test]
        async fn history_carries_previous_exchange() {
            let dir = tempdir().unwrap();
            let backend = ReplayBackend::lines(&["Sure."]);
            let service =
                KoogAgentService::new(backend.clone(), dir.path(), PermissionMode::Chat);

            service.submit_prompt("first").await.collect_all().await;
            service.submit_prompt("second").await.collect_all().await;

            let requests = backend.requests();
            assert_eq!(requests.len(), 2);
            assert_eq!(
                requests[1].messages,
                vec![
                    ChatMessage::user("first"),
                    ChatMessage::assistant("Sure."),
                    ChatMessage::user("second"),
                ]
            );
            assert!(requests[0].system.contains("write_file"));
        }
    }

    mod permissions {
        use super::*;

        #[tokio::test]
        async fn chat_mode_declines_with_notice() {
            let dir = tempdir().unwrap();
            let backend = ReplayBackend::lines(&[
                r#"{"type":"tool","name":"write_file","arguments":{"path":"a.txt","content":"x"}}"#,
            ]);
            let service = KoogAgentService::new(backend, dir.path(), PermissionMode::Chat);

            let events = service.submit_prompt("go").await.collect_all().await;
            let done = finals(&events);
            assert_eq!(done[0].status, ToolCallStatus::Declined);
            assert_eq!(done[0].output, vec![CHAT_MODE_NOTICE]);
            assert!(!dir.path().join("a.txt").exists());
        }

        #[tokio::test]
        async fn user_approval_runs_the_tool() {
            let dir = tempdir().unwrap();
            std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
            let backend = ReplayBackend::lines(&[
                r#"{"type":"tool","name":"view_file","arguments":{"path":"a.txt"}}"#,
            ]);
            let (broker, mut approvals) = ApprovalBroker::channel();
            let service =
                KoogAgentService::new(backend, dir.path(), PermissionMode::ConfirmEachCall)
                    .with_broker(broker);

            let stream = service.submit_prompt("go").await;
            let pending = approvals.recv().await.unwrap();
            assert_eq!(pending.request.tool_name, "view_file");
            pending.approve();

            let events = stream.collect_all().await;
            assert_eq!(finals(&events)[0].output, vec!["hello"]);
        }

        #[tokio::test]
        async fn stopping_releases_waiting_approval() {
            let dir = tempdir().unwrap();
            let backend = ReplayBackend::hanging(&[
                r#"{"type":"tool","name":"write_file","arguments":{"path":"a.txt","content":"x"}}"#,
            ]);
            let (broker, mut approvals) = ApprovalBroker::channel();
            let service =
                KoogAgentService::new(backend, dir.path(), PermissionMode::ConfirmEachCall)
                    .with_broker(broker);

            let mut stream = service.submit_prompt("go").await;
            assert!(matches!(
                stream.recv().await,
                Some(StreamEvent::ToolCallUpdate { is_final: false, .. })
            ));
            let pending = approvals.recv().await.unwrap();

            service.stop().await;
            assert!(pending.is_abandoned());
            assert!(stream.collect_all().await.is_empty());
            assert!(!dir.path().join("a.txt").exists());
        }
    }
}
