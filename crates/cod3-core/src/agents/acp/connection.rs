//! JSON-RPC transport over an agent's stdio.
//!
//! A reader task frames stdout into lines, resolves responses to our
//! requests through a pending map, and queues the agent's own requests and
//! notifications for whoever runs the current turn. Writes are serialized
//! through one async mutex so messages never interleave.

use super::types::{self, JsonRpcMessage, JsonRpcNotification, JsonRpcServerRequest};
use crate::agents::line_buffer::LineBuffer;
use crate::error::{AgentError, Result};
use crate::logging::{self, Direction, LogHandle};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A message the agent sent on its own initiative.
#[derive(Debug, Clone)]
pub enum Inbound {
    Request(JsonRpcServerRequest),
    Notification(JsonRpcNotification),
}

pub struct AcpConnection {
    writer: tokio::sync::Mutex<Option<Writer>>,
    next_id: AtomicU64,
    pending: PendingMap,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: CancellationToken,
    reader: JoinHandle<()>,
    log: LogHandle,
}

impl AcpConnection {
    /// Start the reader task over `reader` and write requests to `writer`.
    pub fn start<R, W>(reader: R, writer: W, log: LogHandle) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            reader,
            tx,
            Arc::clone(&pending),
            closed.clone(),
            log.clone(),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            next_id: AtomicU64::new(0),
            pending,
            inbound: tokio::sync::Mutex::new(rx),
            closed,
            reader,
            log,
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        // The reader drains the map after marking itself closed, so a request
        // registered after that point must be failed here.
        if self.closed.is_cancelled() {
            lock(&self.pending).remove(&id);
            return Err(AgentError::Transport(format!("cannot send {method}")));
        }

        if let Err(err) = self.write(&types::request(id, method, params)).await {
            lock(&self.pending).remove(&id);
            return Err(err);
        }

        rx.await
            .map_err(|_| AgentError::Transport(format!("{method} was abandoned")))?
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write(&types::notification(method, params)).await
    }

    pub async fn respond(&self, id: &Value, result: Value) -> Result<()> {
        self.write(&types::result_response(id, result)).await
    }

    pub async fn respond_error(&self, id: &Value, code: i64, message: &str) -> Result<()> {
        self.write(&types::error_response(id, code, message)).await
    }

    /// Next request or notification from the agent; `None` once the agent
    /// is gone.
    pub async fn next_inbound(&self) -> Option<Inbound> {
        self.inbound.lock().await.recv().await
    }

    /// Take everything already queued from the agent without waiting.
    pub async fn drain_inbound(&self) -> Vec<Inbound> {
        let mut inbound = self.inbound.lock().await;
        let mut drained = Vec::new();
        while let Ok(message) = inbound.try_recv() {
            drained.push(message);
        }
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.reader.is_finished()
    }

    /// Stop reading, close stdin and fail every outstanding request.
    pub async fn close(&self) {
        self.reader.abort();
        self.closed.cancel();
        fail_pending(&self.pending, "connection closed");
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn write(&self, message: &Value) -> Result<()> {
        let line = message.to_string();
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| AgentError::Transport("stdin is closed".to_string()))?;
        logging::log_line(&self.log, Direction::Stdin, &line);
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }
}

impl Drop for AcpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<Inbound>,
    pending: PendingMap,
    closed: CancellationToken,
    log: LogHandle,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; 8192];
    let mut handle = |line: &str| {
        logging::log_line(&log, Direction::Stdout, line);
        dispatch(line, &tx, &pending);
    };

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => lines.push_bytes(&chunk[..n], &mut handle),
            Err(err) => {
                log::warn!("[acp] stdout read failed: {err}");
                break;
            }
        }
    }
    lines.finish(&mut handle);

    log::info!("[acp] Agent output closed");
    closed.cancel();
    fail_pending(&pending, "agent exited");
}

fn dispatch(line: &str, tx: &mpsc::UnboundedSender<Inbound>, pending: &PendingMap) {
    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            log::warn!("[acp] Ignoring non-JSON-RPC line ({err}): {line}");
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(response) => {
            let Some(id) = response.id.as_u64() else {
                log::warn!("[acp] Response with foreign id {}", response.id);
                return;
            };
            let Some(waiter) = lock(pending).remove(&id) else {
                log::warn!("[acp] Response to unknown request {id}");
                return;
            };
            let outcome = match response.error {
                Some(error) => Err(AgentError::Protocol(format!(
                    "{} (code {})",
                    error.message, error.code
                ))),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
        }
        JsonRpcMessage::ServerRequest(request) => {
            let _ = tx.send(Inbound::Request(request));
        }
        JsonRpcMessage::Notification(notification) => {
            let _ = tx.send(Inbound::Notification(notification));
        }
    }
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let waiters: Vec<_> = lock(pending).drain().map(|(_, waiter)| waiter).collect();
    for waiter in waiters {
        let _ = waiter.send(Err(AgentError::Transport(reason.to_string())));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    /// Connection wired to an in-memory peer.
    fn pair() -> (AcpConnection, BufReader<DuplexStream>, DuplexStream) {
        let (client_out, agent_in) = duplex(64 * 1024);
        let (agent_out, client_in) = duplex(64 * 1024);
        let connection = AcpConnection::start(client_in, client_out, logging::disabled());
        (connection, BufReader::new(agent_in), agent_out)
    }

    async fn read_message(reader: &mut BufReader<DuplexStream>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn request_resolves_with_matching_response() {
        let (connection, mut agent_in, mut agent_out) = pair();

        let agent = tokio::spawn(async move {
            let msg = read_message(&mut agent_in).await;
            assert_eq!(msg["method"], "session/new");
            let reply = json!({"jsonrpc": "2.0", "id": msg["id"], "result": {"sessionId": "s-1"}});
            agent_out
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
            (agent_in, agent_out)
        });

        let result = connection.request("session/new", json!({})).await.unwrap();
        assert_eq!(result["sessionId"], "s-1");
        let _keep = agent.await.unwrap();
    }

    #[tokio::test]
    async fn error_response_is_protocol_error() {
        let (connection, mut agent_in, mut agent_out) = pair();
        tokio::spawn(async move {
            let msg = read_message(&mut agent_in).await;
            let reply = json!({"id": msg["id"], "error": {"code": -32000, "message": "nope"}});
            agent_out
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let err = connection.request("initialize", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn inbound_messages_are_queued_in_order() {
        let (connection, _agent_in, mut agent_out) = pair();
        agent_out
            .write_all(
                concat!(
                    "{\"method\":\"session/update\",\"params\":{}}\n",
                    "garbage line\n",
                    "{\"id\":9,\"method\":\"fs/read_text_file\",\"params\":{\"path\":\"a\"}}\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        assert!(matches!(
            connection.next_inbound().await,
            Some(Inbound::Notification(n)) if n.method == "session/update"
        ));
        assert!(matches!(
            connection.next_inbound().await,
            Some(Inbound::Request(r)) if r.method == "fs/read_text_file" && r.id == json!(9)
        ));
    }

    #[tokio::test]
    async fn drain_takes_only_what_is_queued() {
        let (connection, _agent_in, mut agent_out) = pair();
        assert!(connection.drain_inbound().await.is_empty());

        agent_out
            .write_all(
                concat!(
                    "{\"method\":\"session/update\",\"params\":{}}\n",
                    "{\"id\":4,\"method\":\"fs/read_text_file\",\"params\":{\"path\":\"a\"}}\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        let first = connection.next_inbound().await;
        assert!(matches!(first, Some(Inbound::Notification(_))));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let drained = connection.drain_inbound().await;
        assert_eq!(drained.len(), 1);
        assert!(matches!(&drained[0], Inbound::Request(r) if r.id == json!(4)));
        assert!(connection.drain_inbound().await.is_empty());
    }

    #[tokio::test]
    async fn agent_exit_fails_pending_requests() {
        let (connection, agent_in, agent_out) = pair();
        let agent = tokio::spawn(async move {
            let mut agent_in = agent_in;
            let _ = read_message(&mut agent_in).await;
            drop(agent_out);
        });

        let err = connection.request("session/prompt", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
        agent.await.unwrap();
        assert!(connection.next_inbound().await.is_none());
        assert!(connection.is_closed());
        assert!(connection.request("again", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_writes() {
        let (connection, _agent_in, _agent_out) = pair();
        connection.close().await;
        connection.close().await;
        assert!(connection.notify("session/cancel", json!({})).await.is_err());
    }
}
