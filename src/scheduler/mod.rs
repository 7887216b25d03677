//! Scheduled collector
//!
//! Time-lapse snapshots and sensor telemetry logging, run periodically or on
//! demand. Independent of streaming sessions: a capture spawns its own
//! short-lived transcoder.

pub mod runner;
pub mod sensor_log;
pub mod snapshot;

pub use runner::{
    until_next_boundary, Collector, Job, JobReport, Schedule, Scheduler, SchedulerHandle,
};
pub use sensor_log::SensorLogger;
pub use snapshot::{CaptureReport, SnapshotCapturer};
