//! One-shot snapshot capture
//!
//! Layout under the data directory:
//!
//! ```text
//! timelapse_images/<camera>/frame_<id>.jpg   captured image
//! timelapse_images/<camera>/frame_<id>.txt   capture time and camera
//! timelapse_images/<camera>/latest.jpg       copy of the newest image
//! ```
//!
//! `<id>` is the capture time in Unix milliseconds, bumped when needed so it
//! strictly increases per capturer.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;

use crate::catalog::{CameraCatalog, CameraSpec};
use crate::error::{Error, Result};
use crate::media::{Launcher, ProcessExit, SnapshotSettings, TranscoderError};

/// Directory holding per-camera image folders
pub const TIMELAPSE_DIR: &str = "timelapse_images";

/// Name of the newest-image copy
pub const LATEST_FILE: &str = "latest.jpg";

/// Default bound on a single capture
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of capturing every camera
#[derive(Debug, Default)]
pub struct CaptureReport {
    /// Images written
    pub captured: Vec<PathBuf>,
    /// `(camera, error)` for each failed capture
    pub failures: Vec<(String, String)>,
}

impl CaptureReport {
    /// Successful captures
    pub fn succeeded(&self) -> usize {
        self.captured.len()
    }

    /// Attempted captures
    pub fn total(&self) -> usize {
        self.captured.len() + self.failures.len()
    }
}

/// Writes time-lapse images through the launcher
pub struct SnapshotCapturer<L: Launcher> {
    launcher: Arc<L>,
    data_dir: PathBuf,
    settings: SnapshotSettings,
    timeout: Duration,
    last_id: AtomicI64,
}

impl<L: Launcher> SnapshotCapturer<L> {
    /// Create a capturer writing below `data_dir`
    pub fn new(launcher: Arc<L>, data_dir: impl Into<PathBuf>, settings: SnapshotSettings) -> Self {
        Self {
            launcher,
            data_dir: data_dir.into(),
            settings,
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            last_id: AtomicI64::new(0),
        }
    }

    /// Set the per-capture timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Image directory of a camera
    pub fn camera_dir(&self, camera: &CameraSpec) -> PathBuf {
        self.data_dir.join(TIMELAPSE_DIR).join(&camera.name)
    }

    fn next_frame_id(&self, now: DateTime<Utc>) -> i64 {
        let now_ms = now.timestamp_millis();
        let mut last = self.last_id.load(Ordering::Relaxed);
        loop {
            let id = now_ms.max(last + 1);
            match self
                .last_id
                .compare_exchange_weak(last, id, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return id,
                Err(current) => last = current,
            }
        }
    }

    /// Capture one image of `camera`; returns the image path
    pub async fn capture_snapshot(&self, camera: &CameraSpec) -> Result<PathBuf> {
        let dir = self.camera_dir(camera);
        tokio::fs::create_dir_all(&dir).await?;

        let captured_at = Utc::now();
        let id = self.next_frame_id(captured_at);
        let image = dir.join(format!("frame_{}.jpg", id));

        self.run_capture(camera, &image).await?;

        if !tokio::fs::try_exists(&image).await? {
            return Err(Error::Capture(format!(
                "{}: transcoder wrote no image",
                camera.name
            )));
        }

        tokio::fs::copy(&image, dir.join(LATEST_FILE)).await?;
        tokio::fs::write(
            image.with_extension("txt"),
            format!(
                "Captured: {}\nCamera: {}\n",
                captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                camera.name
            ),
        )
        .await?;

        tracing::info!(camera = %camera.name, path = %image.display(), "Snapshot captured");

        Ok(image)
    }

    async fn run_capture(&self, camera: &CameraSpec, output: &Path) -> Result<()> {
        let mut command = self.launcher.snapshot_command(camera, output, &self.settings);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let child = command
            .spawn()
            .map_err(|source| TranscoderError::Spawn { program, source })?;

        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::Capture(format!(
                    "{}: timed out after {}s",
                    camera.name,
                    self.timeout.as_secs_f32()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(Error::Capture(format!(
                "{}: transcoder exited with {}: {}",
                camera.name,
                ProcessExit::from(output.status),
                last_line
            )));
        }

        Ok(())
    }

    /// Capture every camera concurrently
    pub async fn capture_all(&self, catalog: &CameraCatalog) -> CaptureReport {
        let results = join_all(catalog.iter().map(|camera| async move {
            (camera.name.clone(), self.capture_snapshot(camera).await)
        }))
        .await;

        let mut report = CaptureReport::default();
        for (camera, result) in results {
            match result {
                Ok(path) => report.captured.push(path),
                Err(e) => {
                    tracing::warn!(camera = %camera, error = %e, "Snapshot capture failed");
                    report.failures.push((camera, e.to_string()));
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded(),
            total = report.total(),
            "Time-lapse capture finished"
        );

        report
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{camera, ScriptLauncher};

    fn capturer(script: &str, dir: &Path) -> SnapshotCapturer<ScriptLauncher> {
        SnapshotCapturer::new(
            Arc::new(ScriptLauncher::snapshot(script)),
            dir,
            SnapshotSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_capture_writes_image_latest_and_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let capturer = capturer("printf 'JPEGDATA' > \"$1\"", tmp.path());
        let cam = camera("Camera 1", "/camera1");

        let image = tokio_test::assert_ok!(capturer.capture_snapshot(&cam).await);

        let dir = tmp.path().join(TIMELAPSE_DIR).join("Camera 1");
        assert_eq!(image.parent().unwrap(), dir);
        let name = image.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("frame_") && name.ends_with(".jpg"));

        assert_eq!(std::fs::read(&image).unwrap(), b"JPEGDATA");
        assert_eq!(std::fs::read(dir.join(LATEST_FILE)).unwrap(), b"JPEGDATA");

        let sidecar = std::fs::read_to_string(image.with_extension("txt")).unwrap();
        let mut lines = sidecar.lines();
        let captured = lines.next().unwrap().strip_prefix("Captured: ").unwrap();
        assert!(DateTime::parse_from_rfc3339(captured).is_ok());
        assert_eq!(lines.next(), Some("Camera: Camera 1"));
    }

    #[tokio::test]
    async fn test_frame_ids_strictly_increase() {
        let tmp = tempfile::tempdir().unwrap();
        let capturer = capturer("printf x > \"$1\"", tmp.path());
        let cam = camera("cam", "/cam");

        let mut ids = Vec::new();
        for _ in 0..3 {
            let image = capturer.capture_snapshot(&cam).await.unwrap();
            let stem = image.file_stem().unwrap().to_str().unwrap().to_string();
            ids.push(stem.trim_start_matches("frame_").parse::<i64>().unwrap());
        }

        assert!(ids.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_frame_id_bumped_within_same_millisecond() {
        let capturer = capturer("true", Path::new("/tmp"));
        let now = Utc::now();

        let a = capturer.next_frame_id(now);
        let b = capturer.next_frame_id(now);

        assert_eq!(a, now.timestamp_millis());
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn test_failed_capture() {
        let tmp = tempfile::tempdir().unwrap();
        let capturer = capturer("echo 'Connection refused' >&2; exit 1", tmp.path());

        let err = capturer
            .capture_snapshot(&camera("cam", "/cam"))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("code 1"), "{}", message);
        assert!(message.contains("Connection refused"), "{}", message);
        assert!(!tmp.path().join(TIMELAPSE_DIR).join("cam").join(LATEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_capture_timeout_kills_process() {
        let tmp = tempfile::tempdir().unwrap();
        let capturer =
            capturer("exec sleep 30", tmp.path()).with_timeout(Duration::from_millis(100));

        let err = capturer
            .capture_snapshot(&camera("cam", "/cam"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Capture(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_no_image_written() {
        let tmp = tempfile::tempdir().unwrap();
        let capturer = capturer("exit 0", tmp.path());

        let err = capturer
            .capture_snapshot(&camera("cam", "/cam"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Capture(_)));
    }

    #[tokio::test]
    async fn test_capture_all_reports_counts() {
        let tmp = tempfile::tempdir().unwrap();
        // Fails for the camera whose directory name contains "broken"
        let capturer = capturer(
            "case \"$1\" in *broken*) exit 1;; *) printf x > \"$1\";; esac",
            tmp.path(),
        );
        let catalog = CameraCatalog::new(vec![
            camera("one", "/one"),
            camera("two", "/two"),
            camera("broken", "/broken"),
        ])
        .unwrap();

        let report = capturer.capture_all(&catalog).await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.total(), 3);
        assert_eq!(report.failures[0].0, "broken");
    }
}
