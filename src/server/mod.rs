//! HTTP server
//!
//! This module provides:
//! - Server configuration
//! - The HTTP front door mapping camera endpoints to sessions
//! - The `/status` report

pub mod config;
pub mod listener;
pub mod status;

pub use config::ServerConfig;
pub use listener::StreamServer;
pub use status::StatusReport;
