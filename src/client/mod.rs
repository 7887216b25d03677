//! Telemetry API client
//!
//! Provides the sensor data source for the scheduled logger:
//! - Token login against a ThingsBoard-style REST API
//! - Latest-value telemetry queries per device

pub mod config;
pub mod telemetry;

pub use config::{DeviceSpec, TelemetryConfig};
pub use telemetry::{DeviceTelemetry, TelemetryClient, TelemetrySource};
