//! Telemetry client configuration

use std::time::Duration;

use serde::Deserialize;

/// One device whose latest readings are logged
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// Column prefix in the sensor log
    pub name: String,
    /// Device ID on the telemetry server
    pub device_id: String,
}

impl DeviceSpec {
    /// Create a device entry
    pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
        }
    }
}

/// Telemetry API connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Base URL, e.g. `http://localhost:8080`
    pub host: String,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Devices polled on every logging run, in column order
    pub devices: Vec<DeviceSpec>,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8080".to_string(),
            username: String::new(),
            password: String::new(),
            devices: Vec::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl TelemetryConfig {
    /// Create a config for a host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set login credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Add a device
    pub fn device(mut self, device: DeviceSpec) -> Self {
        self.devices.push(device);
        self
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
