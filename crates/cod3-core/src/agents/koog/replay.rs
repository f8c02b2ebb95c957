//! Canned completion backend for tests.

use super::backend::{ChunkStream, CompletionBackend, CompletionRequest};
use crate::error::{AgentError, Result};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct ReplayBackend {
    chunks: Vec<Vec<u8>>,
    failure: Option<String>,
    hang: bool,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ReplayBackend {
    /// Each line newline-terminated, one chunk per line.
    pub(crate) fn lines(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self::from_lines(lines))
    }

    /// `body` cut into chunks of `size` bytes, ignoring char boundaries.
    pub(crate) fn chunked(body: &[u8], size: usize) -> Arc<Self> {
        Arc::new(Self {
            chunks: body.chunks(size).map(<[u8]>::to_vec).collect(),
            ..Self::default()
        })
    }

    /// Lines, then a backend error.
    pub(crate) fn failing(lines: &[&str], message: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(message.to_string()),
            ..Self::from_lines(lines)
        })
    }

    /// Lines, then a stream that never ends.
    pub(crate) fn hanging(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Self::from_lines(lines)
        })
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn from_lines(lines: &[&str]) -> Self {
        Self {
            chunks: lines
                .iter()
                .map(|line| format!("{line}\n").into_bytes())
                .collect(),
            ..Self::default()
        }
    }
}

impl CompletionBackend for ReplayBackend {
    fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());

        let mut items: Vec<Result<Vec<u8>>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.failure {
            items.push(Err(AgentError::Transport(message.clone())));
        }
        let replay = stream::iter(items);
        if self.hang {
            Ok(replay.chain(stream::pending()).boxed())
        } else {
            Ok(replay.boxed())
        }
    }
}
