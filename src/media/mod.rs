//! Media plumbing between the transcoder and the HTTP response
//!
//! This module provides:
//! - Transcoder command construction ([`Launcher`])
//! - The per-session transcoder process handle
//! - Diagnostic line classification
//! - Frame relay (payload unit alignment)
//! - Multipart framing for `multipart/x-mixed-replace` delivery

pub mod diagnostics;
pub mod launcher;
pub mod multipart;
pub mod relay;
pub mod transcoder;

pub use diagnostics::{DiagnosticLevel, DiagnosticLine};
pub use launcher::{FfmpegLauncher, Launcher, SnapshotSettings};
pub use multipart::MultipartFramer;
pub use relay::{FrameAlignment, FrameRelay};
pub use transcoder::{
    ProcessExit, ProcessOutput, SignalCounters, TerminateOutcome, TranscoderError,
    TranscoderProcess,
};
