//! Daily CSV sensor log
//!
//! One file per calendar day under `sensor_logs/`, named `YYYY-MM-DD.csv`.
//! The header row is written by whichever run creates the file; every run
//! with data appends exactly one row.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::client::{DeviceTelemetry, TelemetrySource};
use crate::error::Result;

/// Directory holding the daily logs
pub const SENSOR_LOG_DIR: &str = "sensor_logs";

/// Appends telemetry readings to the daily CSV file
pub struct SensorLogger<S: TelemetrySource> {
    source: Arc<S>,
    log_dir: PathBuf,
}

impl<S: TelemetrySource> SensorLogger<S> {
    /// Create a logger writing below `data_dir`
    pub fn new(source: Arc<S>, data_dir: &Path) -> Self {
        Self {
            source,
            log_dir: data_dir.join(SENSOR_LOG_DIR),
        }
    }

    /// Log directory
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Fetch current readings and append one row; returns rows written
    pub async fn log_telemetry(&self) -> Result<usize> {
        self.log_telemetry_at(Local::now().fixed_offset()).await
    }

    /// Same as [`log_telemetry`](Self::log_telemetry) with an explicit timestamp
    pub async fn log_telemetry_at(&self, at: DateTime<FixedOffset>) -> Result<usize> {
        let readings = self.source.fetch_all().await;
        if readings.iter().all(DeviceTelemetry::is_empty) {
            tracing::warn!("No sensor data available");
            return Ok(0);
        }

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let date = at.format("%Y-%m-%d").to_string();
        let path = self.log_dir.join(format!("{}.csv", date));

        let mut content = String::new();
        let mut file = match OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                content.push_str(&header_row(&readings));
                tracing::info!(path = %path.display(), "Created sensor log");
                file
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                OpenOptions::new().append(true).open(&path).await?
            }
            Err(e) => return Err(e.into()),
        };

        content.push_str(&data_row(&readings, at));
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        let total: usize = readings.iter().map(DeviceTelemetry::len).sum();
        tracing::info!(readings = total, file = %path.display(), "Sensor data logged");

        Ok(1)
    }
}

fn header_row(readings: &[DeviceTelemetry]) -> String {
    let mut fields = vec![
        "timestamp".to_string(),
        "date".to_string(),
        "time".to_string(),
    ];
    for device in readings {
        for (key, _) in &device.readings {
            fields.push(format!("{}_{}", device.device, key));
        }
    }
    join_row(&fields)
}

fn data_row(readings: &[DeviceTelemetry], at: DateTime<FixedOffset>) -> String {
    let mut fields = vec![
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        at.format("%Y-%m-%d").to_string(),
        at.format("%H:%M:%S").to_string(),
    ];
    for device in readings {
        for (_, value) in &device.readings {
            fields.push(value.clone());
        }
    }
    join_row(&fields)
}

fn join_row(fields: &[String]) -> String {
    let mut row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

/// Quote a field if it holds a separator, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
