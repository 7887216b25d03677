//! Session registry implementation

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;

use super::entry::{SessionHandle, SessionInfo, ShutdownReport};
use super::error::RegistryError;

/// Process-wide table of live sessions
///
/// Mutations take the write lock and enumeration the read lock, so a
/// snapshot never observes a half-updated table.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session
    pub async fn register(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        let id = handle.id();

        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }

        tracing::debug!(
            session_id = id,
            camera = %handle.context.camera_name(),
            peer = %handle.context.peer_addr,
            "Session registered"
        );
        sessions.insert(id, handle);

        Ok(())
    }

    /// Remove a session
    ///
    /// Only bookkeeping: removal never stops the session.
    pub async fn unregister(&self, session_id: u64) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(&session_id);

        if removed.is_some() {
            tracing::debug!(session_id = session_id, "Session unregistered");
        }

        removed
    }

    /// Look up a session
    pub async fn get(&self, session_id: u64) -> Option<SessionHandle> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Snapshot of sessions that are starting or streaming, ordered by ID
    pub async fn list_active(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;

        let mut active: Vec<SessionInfo> = sessions
            .values()
            .filter(|h| h.phase().is_active())
            .map(SessionHandle::info)
            .collect();
        active.sort_by_key(|info| info.session_id);

        active
    }

    /// Number of sessions that are starting or streaming
    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|h| h.phase().is_active())
            .count()
    }

    /// Number of registered sessions, closing ones included
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Signal every session to terminate and wait up to `timeout` for all of
    /// them to reach a terminal phase
    ///
    /// Each session stops its own transcoder through its cleanup path, so
    /// process termination is never duplicated here.
    pub async fn broadcast_terminate(&self, timeout: Duration) -> ShutdownReport {
        // Snapshot first: sessions unregister themselves while we wait
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();

        if handles.is_empty() {
            return ShutdownReport::default();
        }

        tracing::info!(sessions = handles.len(), "Terminating all sessions");

        for handle in &handles {
            handle.signal_terminate();
        }

        let waits = join_all(handles.iter().map(|h| h.wait_terminal()));
        if tokio::time::timeout(timeout, waits).await.is_err() {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for sessions to close"
            );
        }

        let timed_out = handles
            .iter()
            .filter(|h| !h.phase().is_terminal())
            .count();

        ShutdownReport {
            signalled: handles.len(),
            completed: handles.len() - timed_out,
            timed_out,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
