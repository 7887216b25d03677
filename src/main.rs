//! camrelay server binary
//!
//! Usage: `camrelay [CONFIG_PATH]`
//!
//! Without a config file the two sample cameras and all defaults are used.
//! `RUST_LOG` controls log output (default `camrelay=info`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camrelay::client::{TelemetryClient, TelemetryConfig};
use camrelay::media::FfmpegLauncher;
use camrelay::scheduler::{Collector, Scheduler, SensorLogger, SnapshotCapturer};
use camrelay::{AppConfig, StreamServer};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camrelay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "camrelay stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> camrelay::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(path.as_deref())?;

    let catalog = Arc::new(config.catalog()?);
    let launcher = Arc::new(FfmpegLauncher::new(&config.server.transcoder));

    tracing::info!(
        transcoder = %launcher.program().display(),
        cameras = catalog.len(),
        "camrelay starting"
    );
    for camera in catalog.iter() {
        tracing::info!(camera = %camera.name, endpoint = %camera.endpoint, "Camera configured");
    }

    let cancel = CancellationToken::new();
    let mut scheduler_task = None;
    let mut scheduler_handle = None;

    if config.snapshots.enabled {
        let telemetry = match config.telemetry.clone() {
            Some(telemetry) => telemetry,
            None => {
                tracing::info!("Telemetry not configured, sensor logs stay empty");
                TelemetryConfig::default()
            }
        };
        let data_dir = config.snapshots.data_dir.clone();

        let capturer = SnapshotCapturer::new(
            Arc::clone(&launcher),
            data_dir.clone(),
            config.snapshot_settings(),
        )
        .with_timeout(Duration::from_secs(config.snapshots.timeout_secs));
        let logger = SensorLogger::new(Arc::new(TelemetryClient::new(telemetry)?), &data_dir);
        let collector = Collector::new(Arc::clone(&catalog), capturer, logger, data_dir.clone());

        let (scheduler, handle) = Scheduler::new(collector, config.schedule());
        tracing::info!(data_dir = %data_dir.display(), "Collector enabled");

        scheduler_task = Some(tokio::spawn(scheduler.run(cancel.clone())));
        scheduler_handle = Some(handle);
    }

    let server = StreamServer::new(config.server_config(), catalog, launcher, scheduler_handle);
    let result = server.run_until(shutdown_signal()).await;

    cancel.cancel();
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Scheduler task failed");
        }
    }

    tracing::info!("camrelay stopped");
    result
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
