//! Turn as a first-class citizen.
//!
//! A turn is one prompt submission and its full response stream. Each turn
//! runs on its own task under a child [`CancellationToken`]; its events go
//! through one ordered channel to the caller's [`EventStream`]. The turn
//! body returns the final text or an error, and [`spawn_turn`] maps that to
//! exactly one `Completed` or `Error` event, or to nothing when the turn was
//! cancelled.

use super::event::{StreamEvent, ToolCallSnapshot};
use crate::error::{AgentError, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// First eight characters, for log prefixes.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receiving end of a turn: a lazy, ordered sequence of events.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl EventStream {
    /// Next event, or `None` once the turn is over.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain the whole turn.
    pub async fn collect_all(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// A stream that yields a single event and ends. Used to report
    /// failures that happen before a turn can start.
    pub fn single(event: StreamEvent) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(event);
        Self { rx }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.rx.poll_recv(cx)
    }
}

/// Sending end handed to a turn body for intermediate events.
#[derive(Debug, Clone)]
pub struct TurnSink {
    id: TurnId,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl TurnSink {
    pub fn id(&self) -> &TurnId {
        &self.id
    }

    pub fn content(&self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.send(StreamEvent::content(text));
        }
    }

    pub fn tool(&self, snapshot: ToolCallSnapshot, is_final: bool) {
        self.send(StreamEvent::tool(snapshot, is_final));
    }

    /// True once the caller dropped its [`EventStream`].
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("[turn {}] Listener gone, event dropped", self.id.short());
        }
    }
}

/// A running turn.
#[derive(Debug)]
pub struct TurnHandle {
    pub id: TurnId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TurnHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the turn and wait for its task to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                log::error!("[turn {}] Turn task panicked", self.id.short());
            }
        }
    }
}

/// Start a turn on its own task.
///
/// `body` receives a sink for content and tool events plus the turn's
/// cancellation token, and resolves to the final text.
pub fn spawn_turn<F, Fut>(parent: &CancellationToken, body: F) -> (TurnHandle, EventStream)
where
    F: FnOnce(TurnSink, CancellationToken) -> Fut,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    let id = TurnId::new();
    let cancel = parent.child_token();
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = TurnSink {
        id: id.clone(),
        tx: tx.clone(),
    };

    let fut = body(sink, cancel.clone());
    let token = cancel.clone();
    let turn_id = id.clone();
    let task = tokio::spawn(async move {
        let result = fut.await;
        let event = match result {
            _ if token.is_cancelled() => None,
            Ok(text) => Some(StreamEvent::Completed { text }),
            Err(AgentError::Cancelled) => None,
            Err(err) => {
                log::error!("[turn {}] Turn failed: {}", turn_id.short(), err);
                Some(StreamEvent::error(err.to_string()))
            }
        };
        match event {
            Some(event) => {
                let _ = tx.send(event);
            }
            None => log::info!("[turn {}] Cancelled", turn_id.short()),
        }
    });

    (TurnHandle { id, cancel, task }, EventStream { rx })
}

/// One conversation slot: at most one turn runs at a time.
#[derive(Debug, Default)]
pub struct TurnSlot {
    current: Mutex<Option<TurnHandle>>,
}

impl TurnSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the running turn (if any), then start a new one.
    pub async fn start<F, Fut>(&self, parent: &CancellationToken, body: F) -> EventStream
    where
        F: FnOnce(TurnSink, CancellationToken) -> Fut,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.stop().await;
        let (handle, stream) = spawn_turn(parent, body);
        let replaced = self.lock().replace(handle);
        if let Some(raced) = replaced {
            // Another caller started a turn while we were stopping ours.
            raced.cancel.cancel();
        }
        stream
    }

    /// Cancel the running turn, if any.
    pub async fn stop(&self) {
        let previous = self.lock().take();
        if let Some(previous) = previous {
            if !previous.is_finished() {
                log::info!("[turn {}] Stopping", previous.id.short());
            }
            previous.stop().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TurnHandle>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
