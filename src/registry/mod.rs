//! Session registry
//!
//! Process-wide table of active client sessions, keyed by session ID. The
//! registry is an observer: it serves status snapshots and bulk termination
//! but never owns a session or its transcoder.
//!
//! ```text
//!   HTTP front door ──register──►  SessionRegistry  ◄──unregister── session cleanup
//!                                 ┌───────────────────┐
//!                                 │ RwLock<HashMap<   │
//!   GET /status ──list_active()──►│   id, SessionHandle│
//!                                 │ >>                │
//!   shutdown ──broadcast_terminate()──► cancel tokens ──► each session's CLOSING
//!                                 └───────────────────┘
//! ```

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{SessionHandle, SessionInfo, ShutdownReport};
pub use error::RegistryError;
pub use store::SessionRegistry;
