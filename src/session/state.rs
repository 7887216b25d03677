//! Session state machine
//!
//! ```text
//!  STARTING ──first part delivered──► STREAMING
//!     │                                   │
//!     │ spawn error / upstream failure    │ disconnect / exit / shutdown
//!     ▼                                   ▼
//!   (CLOSING) ──────────────────────► CLOSING ──► CLOSED | FAILED
//! ```
//!
//! The phase lives in a `watch` channel so the check-and-set that opens the
//! cleanup path is atomic and observers (registry, shutdown) can wait for a
//! terminal phase.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use tokio::sync::watch;

use crate::stats::SessionStats;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Headers committed, transcoder spawn requested
    Starting,
    /// At least one part delivered
    Streaming,
    /// Cleanup running
    Closing,
    /// Terminal after a normal close
    Closed,
    /// Terminal without ever streaming
    Failed,
}

impl SessionPhase {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Failed)
    }

    /// Whether the session counts as an active stream
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Starting | SessionPhase::Streaming)
    }

    /// Allowed transitions
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Starting, Streaming)
                | (Starting, Closing)
                | (Streaming, Closing)
                | (Closing, Closed)
                | (Closing, Failed)
        )
    }

    /// Lowercase name for status output
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Starting => "starting",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Closing => "closing",
            SessionPhase::Closed => "closed",
            SessionPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between a session task and its observers
#[derive(Debug)]
pub struct SessionState {
    phase: watch::Sender<SessionPhase>,
    frames: AtomicU64,
    bytes: AtomicU64,
    started_at: Instant,
    first_frame_at: OnceLock<Instant>,
}

impl SessionState {
    /// New state in `Starting`
    pub fn new() -> Self {
        let (phase, _) = watch::channel(SessionPhase::Starting);
        Self {
            phase,
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started_at: Instant::now(),
            first_frame_at: OnceLock::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Apply `next` if allowed from the current phase
    fn transition(&self, next: SessionPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.can_transition_to(next) {
                *phase = next;
                true
            } else {
                false
            }
        })
    }

    /// `Starting -> Streaming`
    pub fn mark_streaming(&self) -> bool {
        self.transition(SessionPhase::Streaming)
    }

    /// Enter `Closing`
    ///
    /// Returns `true` for exactly one caller over the session's lifetime;
    /// only that caller may run the cleanup sequence.
    pub fn begin_closing(&self) -> bool {
        self.transition(SessionPhase::Closing)
    }

    /// `Closing -> Closed | Failed`
    pub fn finish(&self, terminal: SessionPhase) -> bool {
        debug_assert!(terminal.is_terminal());
        self.transition(terminal)
    }

    /// Wait until the session reaches `Closed` or `Failed`
    pub async fn wait_terminal(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|phase| phase.is_terminal()).await;
    }

    /// Count one delivered part; returns the new frame count
    pub fn record_frame(&self, bytes: usize) -> u64 {
        self.first_frame_at.get_or_init(Instant::now);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Parts delivered so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Bytes delivered so far (framing included)
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Time since the session was created
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.frames(),
            bytes_sent: self.bytes(),
            duration: self.uptime(),
            time_to_first_frame: self
                .first_frame_at
                .get()
                .map(|at| at.duration_since(self.started_at)),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
