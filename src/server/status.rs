//! `/status` response body

use serde::Serialize;

use crate::catalog::CameraCatalog;
use crate::registry::SessionInfo;
use crate::scheduler::SchedulerHandle;
use crate::stats::ServerStats;

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Always `"running"` while the server answers
    pub status: &'static str,
    /// Sessions starting or streaming
    pub active_streams: usize,
    /// Configured cameras
    pub cameras: Vec<CameraStatus>,
    /// Active sessions, ordered by ID
    pub sessions: Vec<SessionStatus>,
    /// Server-wide counters
    pub stats: StatsStatus,
    /// Collector periods, when the collector runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedules: Option<ScheduleStatus>,
    /// Collector data directory, when the collector runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// One camera entry
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    /// Camera name
    pub name: String,
    /// Absolute stream URL as seen by the requester
    pub url: String,
}

/// One session entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Camera name
    pub camera: String,
    /// Session ID
    pub session_id: u64,
    /// Viewer address
    pub peer: String,
    /// Lifecycle phase
    pub phase: &'static str,
    /// Parts delivered
    pub frames: u64,
    /// Bytes delivered
    pub bytes: u64,
    /// Session age in seconds
    pub uptime_secs: u64,
}

/// Counter block
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsStatus {
    /// Sessions ever created
    pub total_sessions: u64,
    /// Sessions that ended `Failed`
    pub failed_sessions: u64,
    /// Requests refused by the session limit
    pub rejected_connections: u64,
}

/// Collector periods
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    /// Time-lapse period in seconds
    pub timelapse_secs: u64,
    /// Sensor logging period in seconds
    pub sensor_secs: u64,
}

impl From<&SessionInfo> for SessionStatus {
    fn from(info: &SessionInfo) -> Self {
        Self {
            camera: info.camera.clone(),
            session_id: info.session_id,
            peer: info.peer_addr.to_string(),
            phase: info.phase.as_str(),
            frames: info.stats.frames_sent,
            bytes: info.stats.bytes_sent,
            uptime_secs: info.stats.duration.as_secs(),
        }
    }
}

impl StatusReport {
    /// Assemble a report; `host` comes from the request's `Host` header
    pub fn build(
        host: &str,
        catalog: &CameraCatalog,
        sessions: &[SessionInfo],
        stats: &ServerStats,
        scheduler: Option<&SchedulerHandle>,
    ) -> Self {
        Self {
            status: "running",
            active_streams: sessions.len(),
            cameras: catalog
                .iter()
                .map(|camera| CameraStatus {
                    name: camera.name.clone(),
                    url: format!("http://{}{}", host, camera.endpoint),
                })
                .collect(),
            sessions: sessions.iter().map(SessionStatus::from).collect(),
            stats: StatsStatus {
                total_sessions: stats.total_sessions,
                failed_sessions: stats.failed_sessions,
                rejected_connections: stats.rejected_connections,
            },
            schedules: scheduler.map(|handle| ScheduleStatus {
                timelapse_secs: handle.schedule().timelapse.as_secs(),
                sensor_secs: handle.schedule().sensors.as_secs(),
            }),
            data_dir: scheduler.map(|handle| handle.data_dir().display().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::CameraSpec;
    use crate::session::SessionPhase;
    use crate::stats::SessionStats;

    #[test]
    fn test_report_json_shape() {
        let catalog = CameraCatalog::new(vec![
            CameraSpec::new("Camera_Zone_1", "/camera1", "rtsp://a"),
            CameraSpec::new("Camera_Zone_2", "/camera2", "rtsp://b"),
        ])
        .unwrap();
        let sessions = vec![SessionInfo {
            session_id: 4,
            camera: "Camera_Zone_2".to_string(),
            peer_addr: "10.0.0.9:50123".parse().unwrap(),
            phase: SessionPhase::Streaming,
            stats: SessionStats {
                frames_sent: 12,
                bytes_sent: 3400,
                duration: Duration::from_secs(3),
                time_to_first_frame: None,
            },
        }];
        let stats = ServerStats {
            total_sessions: 5,
            failed_sessions: 1,
            rejected_connections: 0,
            active_sessions: 1,
        };

        let report = StatusReport::build("relay.local:3000", &catalog, &sessions, &stats, None);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "running");
        assert_eq!(json["activeStreams"], 1);
        assert_eq!(json["cameras"][0]["url"], "http://relay.local:3000/camera1");
        assert_eq!(json["sessions"][0]["sessionId"], 4);
        assert_eq!(json["sessions"][0]["phase"], "streaming");
        assert_eq!(json["sessions"][0]["peer"], "10.0.0.9:50123");
        assert_eq!(json["stats"]["totalSessions"], 5);
        assert!(json.get("schedules").is_none());
        assert!(json.get("dataDir").is_none());
    }
}
