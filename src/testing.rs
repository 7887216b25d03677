//! Shell-script stand-ins for the transcoder, shared by unit tests

use std::path::Path;

use tokio::process::Command;

use crate::catalog::CameraSpec;
use crate::media::{Launcher, SnapshotSettings};

/// `sh -c <script>`
pub(crate) fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

/// Launcher that runs shell scripts instead of ffmpeg
///
/// The snapshot script receives the output path as `$1`.
#[derive(Debug, Clone)]
pub(crate) struct ScriptLauncher {
    pub stream: String,
    pub snapshot: String,
}

impl ScriptLauncher {
    pub(crate) fn streaming(script: &str) -> Self {
        Self {
            stream: script.to_string(),
            snapshot: "printf 'JPEG' > \"$1\"".to_string(),
        }
    }

    pub(crate) fn snapshot(script: &str) -> Self {
        Self {
            stream: "exec sleep 30".to_string(),
            snapshot: script.to_string(),
        }
    }
}

impl Launcher for ScriptLauncher {
    fn stream_command(&self, _camera: &CameraSpec) -> Command {
        sh(&self.stream)
    }

    fn snapshot_command(
        &self,
        _camera: &CameraSpec,
        output: &Path,
        _settings: &SnapshotSettings,
    ) -> Command {
        let mut cmd = sh(&self.snapshot);
        cmd.arg("sh").arg(output);
        cmd
    }
}

/// Camera pointing nowhere; the script launcher ignores the source
pub(crate) fn camera(name: &str, endpoint: &str) -> CameraSpec {
    CameraSpec::new(name, endpoint, "rtsp://127.0.0.1:1/unused")
}
