//! One live ACP agent: process, transport and negotiated session.
//!
//! [`AcpSession::open`] spawns the agent, runs `initialize` and
//! `session/new`, and cleans the process up again if either fails.
//! [`AcpSession::prompt`] drives a single `session/prompt` exchange, turning
//! `session/update` notifications into stream events and answering the
//! agent's permission and file requests while the prompt is in flight.

use super::connection::{AcpConnection, Inbound};
use super::parser::{parse_session_update, AcpUpdate};
use super::types::{
    self, JsonRpcNotification, JsonRpcServerRequest, ReadTextFileParams, RequestPermissionParams,
    WriteTextFileParams, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::agents::accumulator::{raw_arguments, ToolCallAccumulator};
use crate::agents::turn::TurnSink;
use crate::approval::PermissionGate;
use crate::config::LaunchSpec;
use crate::error::{AgentError, Result};
use crate::logging;
use crate::spawn::{AgentProcess, SpawnConfig};
use crate::tools::{LoggingHost, ToolExecutor, ToolHost};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Upper bound for `initialize` plus `session/new`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a cancelled prompt waits for the agent to wind down.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Everything an ACP session needs besides its launch spec.
#[derive(Clone)]
pub struct AcpSessionOptions {
    pub log_dir: Option<PathBuf>,
    pub host: Arc<dyn ToolHost>,
}

impl Default for AcpSessionOptions {
    fn default() -> Self {
        Self {
            log_dir: None,
            host: Arc::new(LoggingHost),
        }
    }
}

pub struct AcpSession {
    spec: LaunchSpec,
    session_id: String,
    protocol_version: u64,
    connection: Arc<AcpConnection>,
    process: tokio::sync::Mutex<AgentProcess>,
    executor: ToolExecutor,
    /// One `session/prompt` at a time per agent session.
    turn_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl AcpSession {
    /// Spawn the agent and negotiate a session rooted at `spec.session_root`.
    pub async fn open(spec: LaunchSpec, options: AcpSessionOptions) -> Result<Self> {
        let log_id = format!("acp-{}", Uuid::new_v4());
        let log = logging::open_log_file(options.log_dir.as_deref(), &log_id);
        let config = SpawnConfig::new(spec.command.clone(), spec.process_dir())
            .label("acp")
            .log(log.clone());
        let mut process = AgentProcess::spawn(config)?;

        let Some((stdin, stdout)) = process.take_stdio() else {
            process.stop().await;
            return Err(AgentError::Initialization(
                "agent stdio is unavailable".to_string(),
            ));
        };
        let connection = Arc::new(AcpConnection::start(stdout, stdin, log));
        let executor = ToolExecutor::new(&spec.session_root).with_host(options.host);
        let cwd = executor.root().display().to_string();

        let negotiated = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&connection, &cwd))
            .await
            .unwrap_or_else(|_| Err(AgentError::Protocol("handshake timed out".to_string())));

        let (protocol_version, session_id) = match negotiated {
            Ok(negotiated) => negotiated,
            Err(err) => {
                log::warn!("[acp] Handshake failed: {err}");
                connection.close().await;
                if let Some(exit) = process.stop().await {
                    log::info!("[acp] Agent exited with {exit}");
                }
                return Err(AgentError::Initialization(err.to_string()));
            }
        };

        log::info!("[acp] Session {session_id} ready (protocol v{protocol_version}) in {cwd}");
        Ok(Self {
            spec,
            session_id,
            protocol_version,
            connection,
            process: tokio::sync::Mutex::new(process),
            executor,
            turn_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn protocol_version(&self) -> u64 {
        self.protocol_version
    }

    /// The process is running and its stdout is still open.
    pub async fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.connection.is_closed() {
            return false;
        }
        self.process.lock().await.is_running()
    }

    /// Send one prompt and stream the agent's response into `sink`.
    ///
    /// Returns the concatenated text sent to `sink` as content. Cancelling `cancel` sends
    /// `session/cancel`, drops unfinished tool calls and yields
    /// [`AgentError::Cancelled`].
    pub async fn prompt(
        &self,
        text: &str,
        sink: &TurnSink,
        gate: &PermissionGate,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let _turn = self.turn_lock.lock().await;
        let turn = sink.id().short().to_string();
        self.discard_stale(&turn).await;
        log::info!("[acp {turn}] Prompt ({} chars)", text.len());

        let request = self.connection.request(
            "session/prompt",
            types::prompt_params(&self.session_id, text),
        );
        tokio::pin!(request);

        let mut accumulator = ToolCallAccumulator::new();
        let mut tasks: JoinSet<Option<String>> = JoinSet::new();
        let mut final_text = String::new();
        let mut inbound_open = true;

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let dropped = accumulator.drain_unfinished();
                    if !dropped.is_empty() {
                        log::info!("[acp {turn}] Dropping unfinished tool calls {dropped:?}");
                    }
                    self.wind_down(&turn, request.as_mut(), tasks).await;
                    return Err(AgentError::Cancelled);
                }
                inbound = self.connection.next_inbound(), if inbound_open => match inbound {
                    Some(Inbound::Notification(notification)) => {
                        on_notification(notification, sink, &mut accumulator, &mut final_text);
                    }
                    Some(Inbound::Request(incoming)) => {
                        self.on_request(incoming, gate, cancel, &mut tasks);
                    }
                    None => inbound_open = false,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok(Some(notice)) = joined {
                        final_text.push_str(&notice);
                        sink.content(notice);
                    }
                }
                result = &mut request => break result,
            }
        };

        tasks.abort_all();
        let unfinished = accumulator.drain_unfinished();
        if !unfinished.is_empty() {
            log::debug!("[acp {turn}] Prompt ended with open tool calls {unfinished:?}");
        }

        let result = result?;
        let stop_reason = result
            .get("stopReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        log::info!("[acp {turn}] Prompt finished: {stop_reason}");
        if stop_reason == "cancelled" && cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(final_text)
    }

    /// Close the transport and stop the process. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[acp] Closing session {}", self.session_id);
        self.connection.close().await;
        if let Some(exit) = self.process.lock().await.stop().await {
            log::info!("[acp] Agent exited with {exit}");
        }
    }

    /// After a cancel: tell the agent, answer whatever it still asks with
    /// `cancelled`, and give the prompt a short grace period to resolve.
    async fn wind_down<F>(
        &self,
        turn: &str,
        mut request: std::pin::Pin<&mut F>,
        mut tasks: JoinSet<Option<String>>,
    ) where
        F: std::future::Future<Output = Result<Value>>,
    {
        if let Err(err) = self
            .connection
            .notify("session/cancel", types::cancel_params(&self.session_id))
            .await
        {
            log::warn!("[acp] Failed to send session/cancel: {err}");
        }

        let deadline = tokio::time::sleep(CANCEL_GRACE);
        tokio::pin!(deadline);
        let mut inbound_open = !self.connection.is_closed();
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    log::warn!("[acp] Agent did not acknowledge cancel in time");
                    break;
                }
                _ = &mut request => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                inbound = self.connection.next_inbound(), if inbound_open => match inbound {
                    Some(Inbound::Request(incoming)) => self.refuse_after_cancel(incoming).await,
                    Some(Inbound::Notification(_)) => {}
                    None => inbound_open = false,
                },
            }
        }
        tasks.abort_all();
        self.discard_stale(turn).await;
    }

    /// Drop whatever the agent queued outside a running prompt. Updates go
    /// nowhere; requests are refused like after a cancel.
    async fn discard_stale(&self, turn: &str) {
        for message in self.connection.drain_inbound().await {
            match message {
                Inbound::Notification(notification) => {
                    log::debug!("[acp {turn}] Dropping stale {}", notification.method);
                }
                Inbound::Request(request) => {
                    log::debug!("[acp {turn}] Refusing stale {}", request.method);
                    self.refuse_after_cancel(request).await;
                }
            }
        }
    }

    async fn refuse_after_cancel(&self, request: JsonRpcServerRequest) {
        let sent = if request.method == "session/request_permission" {
            self.connection
                .respond(&request.id, types::permission_outcome(None))
                .await
        } else {
            self.connection
                .respond_error(&request.id, INTERNAL_ERROR, "Prompt was cancelled")
                .await
        };
        if let Err(err) = sent {
            log::debug!("[acp] Could not answer {} after cancel: {err}", request.method);
        }
    }

    fn on_request(
        &self,
        request: JsonRpcServerRequest,
        gate: &PermissionGate,
        cancel: &CancellationToken,
        tasks: &mut JoinSet<Option<String>>,
    ) {
        let connection = Arc::clone(&self.connection);
        match request.method.as_str() {
            "session/request_permission" => {
                let gate = gate.clone();
                let cancel = cancel.child_token();
                tasks.spawn(async move {
                    answer_permission(&connection, request, &gate, &cancel).await
                });
            }
            "fs/read_text_file" => {
                let executor = self.executor.clone();
                tasks.spawn(async move {
                    answer_read(&connection, request, executor).await;
                    None
                });
            }
            "fs/write_text_file" => {
                let executor = self.executor.clone();
                tasks.spawn(async move {
                    answer_write(&connection, request, executor).await;
                    None
                });
            }
            other => {
                log::warn!("[acp] Unsupported agent request {other}");
                tasks.spawn(async move {
                    let _ = connection
                        .respond_error(&request.id, METHOD_NOT_FOUND, "Method not supported")
                        .await;
                    None
                });
            }
        }
    }
}

async fn handshake(connection: &AcpConnection, cwd: &str) -> Result<(u64, String)> {
    let init = connection
        .request("initialize", types::initialize_params())
        .await?;
    let protocol_version = init
        .get("protocolVersion")
        .and_then(Value::as_u64)
        .unwrap_or(types::PROTOCOL_VERSION);
    if protocol_version != types::PROTOCOL_VERSION {
        log::warn!("[acp] Agent speaks protocol v{protocol_version}, continuing anyway");
    }

    let session = connection
        .request("session/new", types::new_session_params(cwd))
        .await?;
    let session_id = session
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Protocol("session/new returned no sessionId".to_string()))?;
    Ok((protocol_version, session_id.to_string()))
}

fn on_notification(
    notification: JsonRpcNotification,
    sink: &TurnSink,
    accumulator: &mut ToolCallAccumulator,
    final_text: &mut String,
) {
    if notification.method != "session/update" {
        log::debug!("[acp] Ignoring notification {}", notification.method);
        return;
    }
    let params = notification.params.unwrap_or(Value::Null);
    match parse_session_update(&params) {
        AcpUpdate::Content(text) => {
            final_text.push_str(&text);
            sink.content(text);
        }
        AcpUpdate::Tool(update) => {
            if let Some((snapshot, is_final)) = accumulator.on_tool_event(update) {
                sink.tool(snapshot, is_final);
            }
        }
        AcpUpdate::Ignore => {}
    }
}

/// Run the permission gate for one agent request and answer it. Returns a
/// notice to show when the gate refused by policy.
async fn answer_permission(
    connection: &AcpConnection,
    request: JsonRpcServerRequest,
    gate: &PermissionGate,
    cancel: &CancellationToken,
) -> Option<String> {
    let params: RequestPermissionParams = match parse_params(&request) {
        Ok(params) => params,
        Err(message) => {
            let _ = connection
                .respond_error(&request.id, INVALID_PARAMS, &message)
                .await;
            return None;
        }
    };

    let call = &params.tool_call;
    let raw_input = call.raw_input.as_ref();
    let tool_name = raw_input
        .and_then(|input| input.get("name"))
        .and_then(Value::as_str)
        .or(call.title.as_deref())
        .or(call.kind.as_deref())
        .unwrap_or("tool")
        .to_string();
    let arguments = flat_arguments(raw_input);

    let decision = gate
        .should_execute(&tool_name, &arguments, Some(&params.options), cancel)
        .await;
    let option_id = if cancel.is_cancelled() {
        None
    } else {
        decision.option_id.as_deref()
    };
    log::info!(
        "[acp] Permission for {tool_name}: {}",
        option_id.unwrap_or("cancelled")
    );

    if let Err(err) = connection
        .respond(&request.id, types::permission_outcome(option_id))
        .await
    {
        log::warn!("[acp] Failed to answer permission request: {err}");
    }
    if decision.allowed {
        None
    } else {
        decision.notice
    }
}

async fn answer_read(
    connection: &AcpConnection,
    request: JsonRpcServerRequest,
    executor: ToolExecutor,
) {
    let params: ReadTextFileParams = match parse_params(&request) {
        Ok(params) => params,
        Err(message) => {
            let _ = connection
                .respond_error(&request.id, INVALID_PARAMS, &message)
                .await;
            return;
        }
    };
    let read = tokio::task::spawn_blocking(move || {
        executor.read_text(&params.path, params.line, params.limit)
    })
    .await;

    let sent = match read {
        Ok(Ok(content)) => {
            connection
                .respond(&request.id, serde_json::json!({ "content": content }))
                .await
        }
        Ok(Err(err)) => {
            connection
                .respond_error(&request.id, INTERNAL_ERROR, &err.to_string())
                .await
        }
        Err(join) => {
            connection
                .respond_error(&request.id, INTERNAL_ERROR, &join.to_string())
                .await
        }
    };
    if let Err(err) = sent {
        log::warn!("[acp] Failed to answer fs/read_text_file: {err}");
    }
}

async fn answer_write(
    connection: &AcpConnection,
    request: JsonRpcServerRequest,
    executor: ToolExecutor,
) {
    let params: WriteTextFileParams = match parse_params(&request) {
        Ok(params) => params,
        Err(message) => {
            let _ = connection
                .respond_error(&request.id, INVALID_PARAMS, &message)
                .await;
            return;
        }
    };
    let path = params.path.clone();
    let written =
        tokio::task::spawn_blocking(move || executor.write_text(&params.path, &params.content))
            .await;

    let sent = match written {
        Ok(Ok(())) => connection.respond(&request.id, Value::Null).await,
        Ok(Err(err)) => {
            log::warn!("[acp] Refused write to {path}: {err}");
            connection
                .respond_error(&request.id, INTERNAL_ERROR, &err.to_string())
                .await
        }
        Err(join) => {
            connection
                .respond_error(&request.id, INTERNAL_ERROR, &join.to_string())
                .await
        }
    };
    if let Err(err) = sent {
        log::warn!("[acp] Failed to answer fs/write_text_file: {err}");
    }
}

fn parse_params<T: DeserializeOwned>(
    request: &JsonRpcServerRequest,
) -> std::result::Result<T, String> {
    let params = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(params)
        .map_err(|e| format!("Invalid params for {}: {e}", request.method))
}

fn flat_arguments(raw_input: Option<&Value>) -> IndexMap<String, String> {
    match raw_input {
        Some(Value::Object(input)) => raw_arguments(input),
        _ => IndexMap::new(),
    }
}
