//! Periodic collector jobs
//!
//! ```text
//!   wall clock ──► next boundary ──┐
//!                                  ├──► Scheduler task ──► Collector::run_job
//!   SchedulerHandle::trigger ──────┘        (one job at a time)
//! ```
//!
//! Jobs run on fixed periods aligned to multiples of the period since the
//! Unix epoch, so a one-hour period fires at minute 0 and a ten-minute period
//! at :00, :10, ... Manual triggers share the task, so jobs never overlap.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::sensor_log::SensorLogger;
use super::snapshot::SnapshotCapturer;
use crate::catalog::CameraCatalog;
use crate::client::TelemetrySource;
use crate::error::{Error, Result};
use crate::media::Launcher;

/// Pending manual triggers before callers wait
const TRIGGER_QUEUE: usize = 8;

/// Collector jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Capture one image from every camera
    Timelapse,
    /// Append one telemetry row
    Sensors,
}

impl Job {
    /// Lowercase name for logs
    pub fn as_str(self) -> &'static str {
        match self {
            Job::Timelapse => "timelapse",
            Job::Sensors => "sensors",
        }
    }
}

/// Result of a job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "job")]
pub enum JobReport {
    /// Time-lapse capture finished
    Captured {
        /// Cameras captured
        succeeded: usize,
        /// Cameras attempted
        total: usize,
    },
    /// Sensor logging finished
    Logged {
        /// Rows appended
        rows: usize,
    },
}

/// Job periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Time-lapse period
    pub timelapse: Duration,
    /// Sensor logging period
    pub sensors: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            timelapse: Duration::from_secs(3600),
            sensors: Duration::from_secs(600),
        }
    }
}

/// Time from `now` until the next multiple of `period` since the epoch
///
/// Always positive: when `now` sits exactly on a boundary the following one
/// is returned.
pub fn until_next_boundary(now: SystemTime, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1);
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    let remaining = period_ms - now_ms % period_ms;
    Duration::from_millis(remaining as u64)
}

fn next_deadline(period: Duration) -> Instant {
    Instant::now() + until_next_boundary(SystemTime::now(), period)
}

/// The jobs themselves
pub struct Collector<L: Launcher, S: TelemetrySource> {
    catalog: Arc<CameraCatalog>,
    capturer: SnapshotCapturer<L>,
    logger: SensorLogger<S>,
    data_dir: PathBuf,
}

impl<L: Launcher, S: TelemetrySource> Collector<L, S> {
    /// Create a collector
    pub fn new(
        catalog: Arc<CameraCatalog>,
        capturer: SnapshotCapturer<L>,
        logger: SensorLogger<S>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            capturer,
            logger,
            data_dir: data_dir.into(),
        }
    }

    /// Run one job
    pub async fn run_job(&self, job: Job) -> Result<JobReport> {
        match job {
            Job::Timelapse => {
                let report = self.capturer.capture_all(&self.catalog).await;
                Ok(JobReport::Captured {
                    succeeded: report.succeeded(),
                    total: report.total(),
                })
            }
            Job::Sensors => {
                let rows = self.logger.log_telemetry().await?;
                Ok(JobReport::Logged { rows })
            }
        }
    }
}

#[derive(Debug)]
struct Trigger {
    job: Job,
    reply: oneshot::Sender<Result<JobReport>>,
}

/// Cloneable front end of a running scheduler
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    triggers: mpsc::Sender<Trigger>,
    schedule: Schedule,
    data_dir: PathBuf,
}

impl SchedulerHandle {
    /// Run `job` now and wait for its report
    pub async fn trigger(&self, job: Job) -> Result<JobReport> {
        let (reply, rx) = oneshot::channel();
        self.triggers
            .send(Trigger { job, reply })
            .await
            .map_err(|_| Error::Scheduler("scheduler stopped".to_string()))?;

        rx.await
            .map_err(|_| Error::Scheduler("scheduler stopped before the job ran".to_string()))?
    }

    /// Configured periods
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Drives the collector on its schedule
pub struct Scheduler<L: Launcher, S: TelemetrySource> {
    collector: Arc<Collector<L, S>>,
    schedule: Schedule,
    triggers: mpsc::Receiver<Trigger>,
}

impl<L: Launcher, S: TelemetrySource> Scheduler<L, S> {
    /// Create a scheduler and its handle
    pub fn new(collector: Collector<L, S>, schedule: Schedule) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        let handle = SchedulerHandle {
            triggers: tx,
            schedule,
            data_dir: collector.data_dir.clone(),
        };

        let scheduler = Self {
            collector: Arc::new(collector),
            schedule,
            triggers: rx,
        };

        (scheduler, handle)
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut timelapse_at = next_deadline(self.schedule.timelapse);
        let mut sensors_at = next_deadline(self.schedule.sensors);
        let mut triggers_open = true;

        tracing::info!(
            timelapse_secs = self.schedule.timelapse.as_secs(),
            sensor_secs = self.schedule.sensors.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(timelapse_at) => {
                    self.run_scheduled(Job::Timelapse).await;
                    timelapse_at = next_deadline(self.schedule.timelapse);
                }
                _ = tokio::time::sleep_until(sensors_at) => {
                    self.run_scheduled(Job::Sensors).await;
                    sensors_at = next_deadline(self.schedule.sensors);
                }
                trigger = self.triggers.recv(), if triggers_open => match trigger {
                    Some(trigger) => {
                        tracing::info!(job = trigger.job.as_str(), "Manual trigger");
                        let result = self.collector.run_job(trigger.job).await;
                        // Caller may have given up waiting
                        let _ = trigger.reply.send(result);
                    }
                    // Every handle dropped; keep the schedule running
                    None => triggers_open = false,
                },
            }
        }

        tracing::info!("Scheduler stopped");
    }

    async fn run_scheduled(&self, job: Job) {
        match self.collector.run_job(job).await {
            Ok(report) => tracing::debug!(job = job.as_str(), report = ?report, "Scheduled job done"),
            Err(e) => tracing::error!(job = job.as_str(), error = %e, "Scheduled job failed"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::client::DeviceTelemetry;
    use crate::media::SnapshotSettings;
    use crate::scheduler::sensor_log::SENSOR_LOG_DIR;
    use crate::testing::{camera, ScriptLauncher};

    struct OneReading;

    impl TelemetrySource for OneReading {
        async fn fetch_all(&self) -> Vec<DeviceTelemetry> {
            vec![DeviceTelemetry {
                device: "Soil".to_string(),
                readings: vec![("moisture".to_string(), "40".to_string())],
            }]
        }
    }

    fn collector(dir: &Path) -> Collector<ScriptLauncher, OneReading> {
        let catalog = Arc::new(
            CameraCatalog::new(vec![camera("one", "/one"), camera("two", "/two")]).unwrap(),
        );
        let capturer = SnapshotCapturer::new(
            Arc::new(ScriptLauncher::snapshot("printf x > \"$1\"")),
            dir,
            SnapshotSettings::default(),
        );
        let logger = SensorLogger::new(Arc::new(OneReading), dir);
        Collector::new(catalog, capturer, logger, dir)
    }

    #[test]
    fn test_until_next_boundary() {
        let hour = Duration::from_secs(3600);
        let at = |secs: u64| UNIX_EPOCH + Duration::from_secs(secs);

        assert_eq!(until_next_boundary(at(3600 * 5 + 60), hour), Duration::from_secs(3540));
        assert_eq!(until_next_boundary(at(3600 * 5), hour), hour);
        assert_eq!(
            until_next_boundary(at(601), Duration::from_secs(600)),
            Duration::from_secs(599)
        );
    }

    #[tokio::test]
    async fn test_manual_triggers() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, handle) = Scheduler::new(collector(tmp.path()), Schedule::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        assert_eq!(
            handle.trigger(Job::Timelapse).await.unwrap(),
            JobReport::Captured {
                succeeded: 2,
                total: 2
            }
        );
        assert_eq!(
            handle.trigger(Job::Sensors).await.unwrap(),
            JobReport::Logged { rows: 1 }
        );
        assert!(tmp.path().join(SENSOR_LOG_DIR).is_dir());
        assert_eq!(handle.data_dir(), tmp.path());

        cancel.cancel();
        task.await.unwrap();

        let err = handle.trigger(Job::Sensors).await.unwrap_err();
        assert!(matches!(err, Error::Scheduler(_)));
    }

    #[tokio::test]
    async fn test_scheduled_run_fires_on_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let schedule = Schedule {
            timelapse: Duration::from_millis(100),
            sensors: Duration::from_secs(3600),
        };
        let (scheduler, _handle) = Scheduler::new(collector(tmp.path()), schedule);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        let latest = tmp.path().join("timelapse_images").join("one").join("latest.jpg");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !latest.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }
}
