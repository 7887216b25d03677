//! Telemetry client
//!
//! Logs in lazily, keeps the bearer token, and re-authenticates once when a
//! query comes back 401.

use std::collections::BTreeMap;
use std::future::Future;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::config::{DeviceSpec, TelemetryConfig};
use crate::error::TelemetryError;

/// Latest readings of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTelemetry {
    /// Device name from the configuration
    pub device: String,
    /// `(key, value)` pairs, ordered by key
    pub readings: Vec<(String, String)>,
}

impl DeviceTelemetry {
    /// Number of readings
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether the device reported nothing
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Anything that can produce the current sensor readings
pub trait TelemetrySource: Send + Sync + 'static {
    /// Latest readings of every reachable device
    ///
    /// Devices that fail or report nothing are left out.
    fn fetch_all(&self) -> impl Future<Output = Vec<DeviceTelemetry>> + Send;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct TimeseriesPoint {
    value: serde_json::Value,
}

/// Client for a ThingsBoard-style telemetry API
pub struct TelemetryClient {
    config: TelemetryConfig,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl TelemetryClient {
    /// Create a client; no request is made until the first query
    pub fn new(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(TelemetryError::Http)?;

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    /// Configured devices
    pub fn devices(&self) -> &[DeviceSpec] {
        &self.config.devices
    }

    /// Obtain a fresh token
    pub async fn login(&self) -> Result<String, TelemetryError> {
        let url = format!("{}/api/auth/login", self.config.host.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await
            .map_err(TelemetryError::Http)?;

        if !response.status().is_success() {
            return Err(TelemetryError::Auth(format!(
                "login returned {}",
                response.status()
            )));
        }

        let body: LoginResponse = response.json().await.map_err(TelemetryError::Http)?;
        let token = body
            .token
            .ok_or_else(|| TelemetryError::Auth("no token in login response".to_string()))?;

        *self.token.lock().await = Some(token.clone());
        tracing::info!(host = %self.config.host, "Telemetry login succeeded");

        Ok(token)
    }

    async fn current_token(&self) -> Result<String, TelemetryError> {
        let cached = self.token.lock().await.clone();
        match cached {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    /// Latest values of one device, first value per key
    pub async fn latest(&self, device_id: &str) -> Result<Vec<(String, String)>, TelemetryError> {
        let token = self.current_token().await?;
        let response = self.query(device_id, &token).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(device_id = device_id, "Telemetry token rejected, logging in again");
            let token = self.login().await?;
            self.query(device_id, &token).await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(TelemetryError::Status(response.status().as_u16()));
        }

        let series: BTreeMap<String, Vec<TimeseriesPoint>> =
            response.json().await.map_err(TelemetryError::Http)?;

        Ok(series
            .into_iter()
            .filter_map(|(key, points)| {
                points
                    .into_iter()
                    .next()
                    .map(|point| (key, value_text(point.value)))
            })
            .collect())
    }

    async fn query(&self, device_id: &str, token: &str) -> Result<reqwest::Response, TelemetryError> {
        let url = format!(
            "{}/api/plugins/telemetry/DEVICE/{}/values/timeseries",
            self.config.host.trim_end_matches('/'),
            device_id
        );

        self.http
            .get(url)
            .header("X-Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(TelemetryError::Http)
    }
}

impl TelemetrySource for TelemetryClient {
    async fn fetch_all(&self) -> Vec<DeviceTelemetry> {
        let mut all = Vec::with_capacity(self.config.devices.len());

        for device in &self.config.devices {
            match self.latest(&device.device_id).await {
                Ok(readings) if !readings.is_empty() => all.push(DeviceTelemetry {
                    device: device.name.clone(),
                    readings,
                }),
                Ok(_) => {
                    tracing::debug!(device = %device.name, "Device reported no telemetry");
                }
                Err(e) => {
                    tracing::warn!(device = %device.name, error = %e, "Failed to get telemetry");
                }
            }
        }

        all
    }
}

/// Strings stay bare, everything else in JSON form
fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
