//! Statistics for streaming sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Session-level statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Parts delivered to the client
    pub frames_sent: u64,
    /// Bytes delivered, framing included
    pub bytes_sent: u64,
    /// Session age
    pub duration: Duration,
    /// Delay between session start and the first delivered part
    pub time_to_first_frame: Option<Duration>,
}

impl SessionStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Average delivery bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }

    /// Average parts per second
    pub fn framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }
}

/// Server-wide counters, updated concurrently by sessions
#[derive(Debug, Default)]
pub struct ServerCounters {
    total_sessions: AtomicU64,
    failed_sessions: AtomicU64,
    rejected_connections: AtomicU64,
}

impl ServerCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A session was created
    pub fn session_started(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A session ended in `Failed`
    pub fn session_failed(&self) {
        self.failed_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A camera request was turned away before a session existed
    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot
    pub fn snapshot(&self, active_sessions: usize) -> ServerStats {
        ServerStats {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            failed_sessions: self.failed_sessions.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            active_sessions: active_sessions as u64,
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Sessions ever created
    pub total_sessions: u64,
    /// Sessions that ended without streaming
    pub failed_sessions: u64,
    /// Requests refused by the session limit
    pub rejected_connections: u64,
    /// Sessions currently starting or streaming
    pub active_sessions: u64,
}
