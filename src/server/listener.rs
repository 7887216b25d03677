//! HTTP front door
//!
//! Resolves request paths to cameras and hands each viewer its own session.
//!
//! ```text
//!   GET /status        ──► StatusReport (registry snapshot)
//!   GET /capture-now   ──► SchedulerHandle::trigger(Timelapse)
//!   GET /log-now       ──► SchedulerHandle::trigger(Sensors)
//!   GET <endpoint>     ──► ClientSession ──mpsc──► streaming response body
//!   anything else      ──► 404, no session
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;

use super::config::ServerConfig;
use super::status::StatusReport;
use crate::catalog::CameraCatalog;
use crate::error::Result;
use crate::media::{Launcher, MultipartFramer};
use crate::registry::SessionRegistry;
use crate::scheduler::{Job, SchedulerHandle};
use crate::session::{ClientSession, SessionContext};
use crate::stats::{ServerCounters, ServerStats};

/// State shared by all request handlers
struct ServerState<L: Launcher> {
    config: ServerConfig,
    catalog: Arc<CameraCatalog>,
    launcher: Arc<L>,
    registry: Arc<SessionRegistry>,
    counters: Arc<ServerCounters>,
    next_session_id: AtomicU64,
    session_limit: Option<Arc<Semaphore>>,
    sessions: TaskTracker,
    scheduler: Option<SchedulerHandle>,
}

/// Camera relay server
pub struct StreamServer<L: Launcher> {
    state: Arc<ServerState<L>>,
}

impl<L: Launcher> StreamServer<L> {
    /// Create a server for the given cameras
    ///
    /// `scheduler` enables `/capture-now` and `/log-now`.
    pub fn new(
        config: ServerConfig,
        catalog: Arc<CameraCatalog>,
        launcher: Arc<L>,
        scheduler: Option<SchedulerHandle>,
    ) -> Self {
        let session_limit = if config.max_sessions > 0 {
            Some(Arc::new(Semaphore::new(config.max_sessions)))
        } else {
            None
        };

        Self {
            state: Arc::new(ServerState {
                config,
                catalog,
                launcher,
                registry: Arc::new(SessionRegistry::new()),
                counters: Arc::new(ServerCounters::new()),
                next_session_id: AtomicU64::new(1),
                session_limit,
                sessions: TaskTracker::new(),
                scheduler,
            }),
        }
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Server-wide statistics
    pub async fn stats(&self) -> ServerStats {
        self.state
            .counters
            .snapshot(self.state.registry.active_count().await)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }

    /// Request router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/status", get(status::<L>))
            .route("/capture-now", get(capture_now::<L>))
            .route("/log-now", get(log_now::<L>))
            .fallback(camera_stream::<L>)
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// On shutdown: stop accepting, terminate every session with a bounded
    /// wait, then wait (bounded) for session tasks and open connections.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            cameras = self.state.catalog.len(),
            "Camera relay listening"
        );

        let stop_accepting = CancellationToken::new();
        let serve = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown({
            let stop = stop_accepting.clone();
            async move { stop.cancelled().await }
        });
        let mut http = tokio::spawn(async move { serve.await });

        tokio::select! {
            result = &mut http => {
                // Server ended on its own
                return match result {
                    Ok(result) => result.map_err(Into::into),
                    Err(e) => Err(std::io::Error::other(e).into()),
                };
            }
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
        }

        stop_accepting.cancel();
        let timeout = self.state.config.shutdown_timeout;

        let report = self.state.registry.broadcast_terminate(timeout).await;
        tracing::info!(
            signalled = report.signalled,
            completed = report.completed,
            timed_out = report.timed_out,
            "Sessions terminated"
        );

        self.state.sessions.close();
        if tokio::time::timeout(timeout, self.state.sessions.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.state.sessions.len(),
                "Session tasks still running at shutdown"
            );
        }

        match tokio::time::timeout(timeout, &mut http).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server task failed"),
            Err(_) => {
                tracing::warn!("HTTP connections still open at shutdown");
                http.abort();
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// `GET <camera endpoint>`
async fn camera_stream<L: Launcher>(
    State(state): State<Arc<ServerState<L>>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
) -> Response {
    let Some(camera) = state.catalog.lookup(uri.path()) else {
        tracing::debug!(path = %uri.path(), peer = %peer, "Unknown camera path");
        return (StatusCode::NOT_FOUND, "Camera not found").into_response();
    };

    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let permit = match &state.session_limit {
        Some(limit) => match Arc::clone(limit).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(peer = %peer, camera = %camera.name, "Session rejected: limit reached");
                state.counters.connection_rejected();
                return (StatusCode::SERVICE_UNAVAILABLE, "Too many viewers").into_response();
            }
        },
        None => None,
    };

    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let settings = state.config.session_settings();
    let content_type =
        MultipartFramer::new(settings.boundary.clone(), camera.part_content_type.clone())
            .content_type();

    let (sink, body) = mpsc::channel(state.config.sink_capacity);
    let session = ClientSession::new(
        SessionContext::new(session_id, peer, Arc::clone(camera)),
        Arc::clone(&state.launcher),
        settings,
        sink,
        Arc::clone(&state.registry),
        Arc::clone(&state.counters),
    );

    if let Err(e) = session.register().await {
        tracing::error!(session_id = session_id, error = %e, "Failed to register session");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    state.sessions.spawn(async move {
        let _permit = permit;
        session.run().await;
    });

    let body = Body::from_stream(ReceiverStream::new(body).map(Ok::<_, Infallible>));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.as_str()),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    )
        .into_response()
}

/// `GET /status`
async fn status<L: Launcher>(
    State(state): State<Arc<ServerState<L>>>,
    headers: HeaderMap,
) -> Json<StatusReport> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");

    let sessions = state.registry.list_active().await;
    let stats = state.counters.snapshot(sessions.len());

    Json(StatusReport::build(
        host,
        &state.catalog,
        &sessions,
        &stats,
        state.scheduler.as_ref(),
    ))
}

/// `GET /capture-now`
async fn capture_now<L: Launcher>(State(state): State<Arc<ServerState<L>>>) -> Response {
    run_job(state.scheduler.as_ref(), Job::Timelapse).await
}

/// `GET /log-now`
async fn log_now<L: Launcher>(State(state): State<Arc<ServerState<L>>>) -> Response {
    run_job(state.scheduler.as_ref(), Job::Sensors).await
}

async fn run_job(scheduler: Option<&SchedulerHandle>, job: Job) -> Response {
    let Some(scheduler) = scheduler else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": "collector disabled" })),
        )
            .into_response();
    };

    match scheduler.trigger(job).await {
        Ok(report) => Json(json!({ "success": true, "report": report })).into_response(),
        Err(e) => {
            tracing::error!(job = job.as_str(), error = %e, "Manual job failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
