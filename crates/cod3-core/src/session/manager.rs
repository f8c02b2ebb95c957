//! SessionManager - owns the one live ACP agent and decides when to reuse it.

use crate::agents::acp::{AcpSession, AcpSessionOptions};
use crate::config::LaunchSpec;
use crate::error::{AgentError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keeps at most one live agent session.
///
/// A session is reused while its [`LaunchSpec`] matches and the process is
/// alive. Anything else tears the old one down completely, under the same
/// lock, before a replacement is started.
pub struct SessionManager {
    current: Mutex<Option<Arc<AcpSession>>>,
    options: AcpSessionOptions,
    disposed: AtomicBool,
}

impl SessionManager {
    pub fn new(options: AcpSessionOptions) -> Self {
        Self {
            current: Mutex::new(None),
            options,
            disposed: AtomicBool::new(false),
        }
    }

    /// Return the live session for `spec`, starting one if needed.
    pub async fn ensure_session(&self, spec: &LaunchSpec) -> Result<Arc<AcpSession>> {
        let mut current = self.current.lock().await;
        if self.disposed.load(Ordering::SeqCst) {
            return Err(AgentError::Cancelled);
        }

        if let Some(session) = current.as_ref() {
            if session.spec() == spec && session.is_alive().await {
                return Ok(Arc::clone(session));
            }
        }

        if let Some(stale) = current.take() {
            if stale.spec() == spec {
                log::info!("[session] Agent {} died, restarting", stale.session_id());
            } else {
                log::info!("[session] Launch settings changed, replacing {}", stale.session_id());
            }
            stale.close().await;
        }

        let session = Arc::new(AcpSession::open(spec.clone(), self.options.clone()).await?);
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    /// The live session, if one was started.
    pub async fn current(&self) -> Option<Arc<AcpSession>> {
        self.current.lock().await.clone()
    }

    /// Close the session and refuse new ones. Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let session = self.current.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(AcpSessionOptions::default())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::agents::acp::fake::{idle_agent, launch_spec};
    use tempfile::tempdir;

    mod reuse {
        use super::*;

        #[tokio::test]
        async fn same_spec_reuses_live_session() {
            let dir = tempdir().unwrap();
            let spec = idle_agent(dir.path());
            let manager = SessionManager::default();

            let first = manager.ensure_session(&spec).await.unwrap();
            let second = manager.ensure_session(&spec).await.unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            manager.dispose().await;
        }

        #[tokio::test]
        async fn changed_spec_replaces_session() {
            let dir = tempdir().unwrap();
            let spec = idle_agent(dir.path());
            let mut moved = spec.clone();
            moved.working_dir = Some(dir.path().to_path_buf());
            let manager = SessionManager::default();

            let first = manager.ensure_session(&spec).await.unwrap();
            let second = manager.ensure_session(&moved).await.unwrap();
            assert!(!Arc::ptr_eq(&first, &second));
            assert!(!first.is_alive().await, "old agent must be closed");
            assert!(second.is_alive().await);
            manager.dispose().await;
        }

        #[tokio::test]
        async fn dead_session_is_recreated() {
            let dir = tempdir().unwrap();
            let spec = idle_agent(dir.path());
            let manager = SessionManager::default();

            let first = manager.ensure_session(&spec).await.unwrap();
            first.close().await;
            let second = manager.ensure_session(&spec).await.unwrap();
            assert!(!Arc::ptr_eq(&first, &second));
            assert!(second.is_alive().await);
            manager.dispose().await;
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn failed_start_leaves_no_session() {
            let dir = tempdir().unwrap();
            let manager = SessionManager::default();
            let spec = launch_spec(dir.path(), vec!["/nonexistent/cod3-agent".to_string()]);

            let err = manager.ensure_session(&spec).await.err().unwrap();
            assert!(matches!(err, AgentError::Configuration(_)));
            assert!(manager.current().await.is_none());
        }

        #[tokio::test]
        async fn dispose_is_idempotent_and_final() {
            let dir = tempdir().unwrap();
            let spec = idle_agent(dir.path());
            let manager = SessionManager::default();
            let session = manager.ensure_session(&spec).await.unwrap();

            manager.dispose().await;
            manager.dispose().await;
            assert!(manager.is_disposed());
            assert!(!session.is_alive().await);
            assert!(matches!(
                manager.ensure_session(&spec).await,
                Err(AgentError::Cancelled)
            ));
        }
    }
}
