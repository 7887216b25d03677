//! Transcoder command construction
//!
//! A [`Launcher`] decides which executable runs and with which arguments.
//! Sessions and the snapshot capturer only see `tokio::process::Command`s,
//! so the transcoder stays an opaque capability.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::catalog::CameraSpec;

/// Settings for one-shot snapshot capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSettings {
    /// Quality scale (2-31, lower is better)
    pub quality: u8,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            quality: 5,
            width: 1920,
            height: 1080,
        }
    }
}

/// Builds transcoder commands for cameras
pub trait Launcher: Send + Sync + 'static {
    /// Command that streams the camera continuously to stdout
    fn stream_command(&self, camera: &CameraSpec) -> Command;

    /// Command that writes exactly one image of the camera to `output`
    fn snapshot_command(
        &self,
        camera: &CameraSpec,
        output: &Path,
        settings: &SnapshotSettings,
    ) -> Command;
}

/// Launcher running the `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    /// Use the given executable path
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Executable path
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Launcher for FfmpegLauncher {
    fn stream_command(&self, camera: &CameraSpec) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(camera.stream_args());
        cmd
    }

    fn snapshot_command(
        &self,
        camera: &CameraSpec,
        output: &Path,
        settings: &SnapshotSettings,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(camera.encoding.input_args())
            .arg("-i")
            .arg(&camera.source_url)
            .args(["-frames:v", "1"])
            .arg("-q:v")
            .arg(settings.quality.to_string())
            .arg("-s")
            .arg(format!("{}x{}", settings.width, settings.height))
            .arg("-y")
            .arg(output);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_stream_command() {
        let launcher = FfmpegLauncher::default();
        let camera = CameraSpec::new("cam", "/cam", "rtsp://10.0.0.1/stream1");
        let cmd = launcher.stream_command(&camera);

        assert_eq!(cmd.as_std().get_program(), "ffmpeg");
        assert_eq!(args_of(&cmd), camera.stream_args());
    }

    #[test]
    fn test_snapshot_command() {
        let launcher = FfmpegLauncher::new("/usr/local/bin/ffmpeg");
        let camera = CameraSpec::new("cam", "/cam", "rtsp://10.0.0.1/stream1");
        let cmd = launcher.snapshot_command(
            &camera,
            Path::new("/tmp/frame_1.jpg"),
            &SnapshotSettings::default(),
        );

        assert_eq!(
            args_of(&cmd),
            vec![
                "-rtsp_transport",
                "tcp",
                "-i",
                "rtsp://10.0.0.1/stream1",
                "-frames:v",
                "1",
                "-q:v",
                "5",
                "-s",
                "1920x1080",
                "-y",
                "/tmp/frame_1.jpg"
            ]
        );
    }
}
