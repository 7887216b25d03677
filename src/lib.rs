//! # camrelay
//!
//! Relays RTSP cameras to any number of HTTP viewers as MJPEG
//! (`multipart/x-mixed-replace`), with one supervised transcoder per viewer.
//!
//! Every viewer request on a camera endpoint gets its own session and its own
//! transcoder process. The session owns the process: when the viewer goes
//! away, the transcoder exits, or the server shuts down, the process is asked
//! to stop, then killed after a grace window, exactly once.
//!
//! A scheduled collector runs alongside the relay: hourly time-lapse
//! snapshots per camera and a ten-minute sensor telemetry CSV log.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use camrelay::catalog::{CameraCatalog, CameraSpec};
//! use camrelay::media::FfmpegLauncher;
//! use camrelay::{ServerConfig, StreamServer};
//!
//! #[tokio::main]
//! async fn main() -> camrelay::Result<()> {
//!     let catalog = CameraCatalog::new(vec![CameraSpec::new(
//!         "Camera_Zone_1",
//!         "/camera1",
//!         "rtsp://192.168.0.142:554/11",
//!     )])?;
//!
//!     let server = StreamServer::new(
//!         ServerConfig::default(),
//!         Arc::new(catalog),
//!         Arc::new(FfmpegLauncher::default()),
//!         None,
//!     );
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testing;

pub use catalog::{CameraCatalog, CameraSpec};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use server::{ServerConfig, StatusReport, StreamServer};
pub use session::{CloseReason, SessionOutcome, SessionPhase};
