//! Session context
//!
//! Identity of a session: which connection, which camera.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::catalog::CameraSpec;

/// Immutable identity of a client session
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address of the viewer connection
    pub peer_addr: SocketAddr,

    /// Camera being streamed
    pub camera: Arc<CameraSpec>,
}

impl SessionContext {
    /// Create a new context
    pub fn new(session_id: u64, peer_addr: SocketAddr, camera: Arc<CameraSpec>) -> Self {
        Self {
            session_id,
            peer_addr,
            camera,
        }
    }

    /// Camera name
    pub fn camera_name(&self) -> &str {
        &self.camera.name
    }

    /// Connection key: endpoint plus peer address
    pub fn connection_key(&self) -> String {
        format!("{}@{}", self.camera.endpoint, self.peer_addr)
    }
}

impl std::fmt::Display for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.session_id, self.connection_key())
    }
}
