//! Client session handling
//!
//! A session binds one viewer connection to one transcoder process for its
//! whole lifetime. Sessions never share a process.

pub mod client;
pub mod context;
pub mod state;

pub use client::{ClientSession, CloseReason, SessionOutcome, SessionSettings};
pub use context::SessionContext;
pub use state::{SessionPhase, SessionState};
