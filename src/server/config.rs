//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::media::multipart::DEFAULT_BOUNDARY;
use crate::media::relay::DEFAULT_MAX_FRAME_SIZE;
use crate::media::transcoder::DEFAULT_READ_BUFFER;
use crate::media::FrameAlignment;
use crate::session::SessionSettings;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 3000;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Wait between polite termination and a forced kill of a transcoder
    pub grace_window: Duration,

    /// Bound on waiting for sessions to close at shutdown
    pub shutdown_timeout: Duration,

    /// Parts buffered between a session and its socket
    pub sink_capacity: usize,

    /// Size of a single transcoder stdout read
    pub read_buffer_size: usize,

    /// Largest unterminated JPEG held before it is flushed
    pub max_frame_size: usize,

    /// How transcoder output is cut into parts
    pub alignment: FrameAlignment,

    /// Multipart boundary token
    pub boundary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_sessions: 0, // Unlimited
            grace_window: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
            sink_capacity: 4,
            read_buffer_size: DEFAULT_READ_BUFFER,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            alignment: FrameAlignment::Jpeg,
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the termination grace window
    pub fn grace_window(mut self, grace: Duration) -> Self {
        self.grace_window = grace;
        self
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the per-session sink capacity (at least 1)
    pub fn sink_capacity(mut self, parts: usize) -> Self {
        self.sink_capacity = parts.max(1);
        self
    }

    /// Set the transcoder read size (at least 1)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the largest unterminated frame (at least 1)
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.max(1);
        self
    }

    /// Set the frame alignment
    pub fn alignment(mut self, alignment: FrameAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the multipart boundary token
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Settings handed to every session
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            grace_window: self.grace_window,
            read_buffer_size: self.read_buffer_size,
            alignment: self.alignment,
            max_frame_size: self.max_frame_size,
            boundary: self.boundary.clone(),
        }
    }
}
