//! Application configuration
//!
//! Loaded from an optional JSON file, then overridden from the environment:
//!
//! | Variable            | Field                  |
//! |---------------------|------------------------|
//! | `CAMRELAY_BIND`     | `server.bind`          |
//! | `CAMRELAY_FFMPEG`   | `server.transcoder`    |
//! | `CAMRELAY_DATA_DIR` | `snapshots.dataDir`    |
//! | `CAMRELAY_GRACE_MS` | `server.graceMs`       |
//!
//! Every section has defaults, so an empty object is a valid file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{CameraCatalog, CameraSpec};
use crate::client::TelemetryConfig;
use crate::error::{Error, Result};
use crate::media::multipart::DEFAULT_BOUNDARY;
use crate::media::relay::DEFAULT_MAX_FRAME_SIZE;
use crate::media::transcoder::DEFAULT_READ_BUFFER;
use crate::media::{FrameAlignment, SnapshotSettings};
use crate::scheduler::Schedule;
use crate::server::config::DEFAULT_PORT;
use crate::server::ServerConfig;

/// Whole application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// HTTP server and session settings
    pub server: ServerSection,
    /// Cameras, in listing order
    pub cameras: Vec<CameraSpec>,
    /// Time-lapse capture and collector data directory
    pub snapshots: SnapshotSection,
    /// Telemetry API; no sensor logging without it
    pub telemetry: Option<TelemetryConfig>,
    /// Collector periods
    pub schedule: ScheduleSection,
}

/// `server` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSection {
    /// Listen address
    pub bind: SocketAddr,
    /// Transcoder executable
    pub transcoder: PathBuf,
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Termination grace window in milliseconds
    pub grace_ms: u64,
    /// Shutdown wait bound in milliseconds
    pub shutdown_timeout_ms: u64,
    /// Parts buffered per session
    pub sink_capacity: usize,
    /// Transcoder read size in bytes
    pub read_buffer_size: usize,
    /// Largest unterminated frame in bytes
    pub max_frame_size: usize,
    /// `"jpeg"` or `"chunk"`
    pub alignment: FrameAlignment,
    /// Multipart boundary token
    pub boundary: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            transcoder: PathBuf::from("ffmpeg"),
            max_sessions: 0,
            grace_ms: 2000,
            shutdown_timeout_ms: 5000,
            sink_capacity: 4,
            read_buffer_size: DEFAULT_READ_BUFFER,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            alignment: FrameAlignment::Jpeg,
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

/// `snapshots` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotSection {
    /// Run the scheduled collector
    pub enabled: bool,
    /// Root of `timelapse_images/` and `sensor_logs/`
    pub data_dir: PathBuf,
    /// Quality scale (2-31, lower is better)
    pub quality: u8,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
    /// Bound on one capture in seconds
    pub timeout_secs: u64,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        let settings = SnapshotSettings::default();
        Self {
            enabled: true,
            data_dir: PathBuf::from("./farm_data"),
            quality: settings.quality,
            width: settings.width,
            height: settings.height,
            timeout_secs: 30,
        }
    }
}

/// `schedule` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleSection {
    /// Time-lapse period in seconds
    pub timelapse_secs: u64,
    /// Sensor logging period in seconds
    pub sensor_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        let schedule = Schedule::default();
        Self {
            timelapse_secs: schedule.timelapse.as_secs(),
            sensor_secs: schedule.sensors.as_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            cameras: vec![
                CameraSpec::new("Camera_Zone_1", "/camera1", "rtsp://192.168.0.142:554/11"),
                CameraSpec::new("Camera_Zone_2", "/camera2", "rtsp://192.168.0.237:554/stream1"),
            ],
            snapshots: SnapshotSection::default(),
            telemetry: None,
            schedule: ScheduleSection::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (defaults when `None`) and apply process environment
    /// overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("CAMRELAY_BIND") {
            self.server.bind = bind
                .parse()
                .map_err(|_| Error::Config(format!("CAMRELAY_BIND: invalid address {:?}", bind)))?;
        }
        if let Some(program) = lookup("CAMRELAY_FFMPEG") {
            self.server.transcoder = PathBuf::from(program);
        }
        if let Some(dir) = lookup("CAMRELAY_DATA_DIR") {
            self.snapshots.data_dir = PathBuf::from(dir);
        }
        if let Some(grace) = lookup("CAMRELAY_GRACE_MS") {
            self.server.grace_ms = grace
                .parse()
                .map_err(|_| Error::Config(format!("CAMRELAY_GRACE_MS: not a number: {:?}", grace)))?;
        }
        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.schedule.timelapse_secs == 0 || self.schedule.sensor_secs == 0 {
            return Err(Error::Config("schedule periods must be positive".to_string()));
        }
        let boundary_ok = !self.server.boundary.is_empty()
            && self.server.boundary.len() <= 70
            && self
                .server
                .boundary
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c));
        if !boundary_ok {
            return Err(Error::Config(format!(
                "invalid multipart boundary {:?}",
                self.server.boundary
            )));
        }
        Ok(())
    }

    /// Build the camera catalog
    pub fn catalog(&self) -> Result<CameraCatalog> {
        Ok(CameraCatalog::new(self.cameras.clone())?)
    }

    /// Server settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::with_addr(self.server.bind)
            .max_sessions(self.server.max_sessions)
            .grace_window(Duration::from_millis(self.server.grace_ms))
            .shutdown_timeout(Duration::from_millis(self.server.shutdown_timeout_ms))
            .sink_capacity(self.server.sink_capacity)
            .read_buffer_size(self.server.read_buffer_size)
            .max_frame_size(self.server.max_frame_size)
            .alignment(self.server.alignment)
            .boundary(self.server.boundary.clone())
    }

    /// Snapshot capture settings
    pub fn snapshot_settings(&self) -> SnapshotSettings {
        SnapshotSettings {
            quality: self.snapshots.quality.clamp(2, 31),
            width: self.snapshots.width,
            height: self.snapshots.height,
        }
    }

    /// Collector periods
    pub fn schedule(&self) -> Schedule {
        Schedule {
            timelapse: Duration::from_secs(self.schedule.timelapse_secs),
            sensors: Duration::from_secs(self.schedule.sensor_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind.port(), 3000);
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].endpoint, "/camera1");
        assert!(config.snapshots.enabled);
        assert!(config.telemetry.is_none());
        assert_eq!(config.schedule().timelapse, Duration::from_secs(3600));
        assert_eq!(config.schedule().sensors, Duration::from_secs(600));
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_from_json() {
        let config = AppConfig::from_json(
            r#"{
                "server": { "bind": "127.0.0.1:8090", "maxSessions": 6, "alignment": "chunk" },
                "cameras": [
                    { "name": "Barn", "endpoint": "/barn", "sourceUrl": "rtsp://10.0.0.2/live",
                      "encoding": { "quality": 4, "frameRate": 10 } }
                ],
                "snapshots": { "enabled": false },
                "telemetry": { "host": "http://tb:8080", "devices": [{ "name": "Soil", "deviceId": "s1" }] },
                "schedule": { "sensorSecs": 300 }
            }"#,
        )
        .unwrap();

        let server = config.server_config();
        assert_eq!(server.bind_addr, "127.0.0.1:8090".parse::<SocketAddr>().unwrap());
        assert_eq!(server.max_sessions, 6);
        assert_eq!(server.alignment, FrameAlignment::Chunk);
        assert_eq!(server.grace_window, Duration::from_secs(2));

        assert_eq!(config.cameras[0].encoding.quality, 4);
        assert_eq!(config.cameras[0].encoding.frame_rate, 10);
        assert!(!config.snapshots.enabled);
        assert_eq!(config.telemetry.unwrap().devices[0].device_id, "s1");
        assert_eq!(config.schedule.sensor_secs, 300);
        assert_eq!(config.schedule.timelapse_secs, 3600);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CAMRELAY_BIND", "127.0.0.1:9999"),
            ("CAMRELAY_FFMPEG", "/opt/ffmpeg/bin/ffmpeg"),
            ("CAMRELAY_DATA_DIR", "/var/lib/camrelay"),
            ("CAMRELAY_GRACE_MS", "750"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.bind.port(), 9999);
        assert_eq!(config.server.transcoder, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.snapshots.data_dir, PathBuf::from("/var/lib/camrelay"));
        assert_eq!(config.server_config().grace_window, Duration::from_millis(750));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = AppConfig::default();

        let result = config.apply_env(|key| (key == "CAMRELAY_GRACE_MS").then(|| "soon".to_string()));

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.schedule.sensor_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.boundary = "has space".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_catalog_errors_surface() {
        let config = AppConfig::from_json(
            r#"{ "cameras": [
                { "name": "a", "endpoint": "/status", "sourceUrl": "rtsp://x" }
            ] }"#,
        )
        .unwrap();

        assert!(matches!(config.catalog(), Err(Error::Catalog(_))));
    }

    #[test]
    fn test_load_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("camrelay.json");
        std::fs::write(&path, r#"{ "server": { "shutdownTimeoutMs": 1500 } }"#).unwrap();

        let config = AppConfig::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            config.server_config().shutdown_timeout,
            Duration::from_millis(1500)
        );

        let missing = AppConfig::load(Some(&tmp.path().join("missing.json")));
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
