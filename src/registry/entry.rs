//! Registry entry types
//!
//! An entry is a back-reference to a running session: enough to report on it
//! and to ask it to stop, never enough to own or clean it up.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::session::{SessionContext, SessionPhase, SessionState};
use crate::stats::SessionStats;

/// Registry entry for one session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session identity
    pub context: SessionContext,

    /// Shared phase and counters
    state: Arc<SessionState>,

    /// Cancels the session task, which then runs its own cleanup
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create an entry
    pub fn new(context: SessionContext, state: Arc<SessionState>, cancel: CancellationToken) -> Self {
        Self {
            context,
            state,
            cancel,
        }
    }

    /// Session ID
    pub fn id(&self) -> u64 {
        self.context.session_id
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Ask the session to close
    ///
    /// The session task funnels this into its single cleanup path.
    pub fn signal_terminate(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session is `Closed` or `Failed`
    pub async fn wait_terminal(&self) {
        self.state.wait_terminal().await
    }

    /// Status snapshot
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.context.session_id,
            camera: self.context.camera.name.clone(),
            peer_addr: self.context.peer_addr,
            phase: self.state.phase(),
            stats: self.state.stats(),
        }
    }
}

/// Status snapshot of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session ID
    pub session_id: u64,
    /// Camera name
    pub camera: String,
    /// Viewer address
    pub peer_addr: SocketAddr,
    /// Phase at snapshot time
    pub phase: SessionPhase,
    /// Counters at snapshot time
    pub stats: SessionStats,
}

impl SessionInfo {
    /// Parts delivered so far
    pub fn frames(&self) -> u64 {
        self.stats.frames_sent
    }
}

/// Outcome of a bulk termination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that were signalled
    pub signalled: usize,
    /// Sessions that reached a terminal phase in time
    pub completed: usize,
    /// Sessions still running when the deadline passed
    pub timed_out: usize,
}
