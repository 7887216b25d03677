//! Client session runner
//!
//! One viewer connection bound to one transcoder process. The session task
//! pumps process output through the frame relay and multipart framer into
//! the response sink, and every way out of the loop (disconnect, write
//! failure, upstream failure, shutdown) ends in the same cleanup path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::context::SessionContext;
use super::state::{SessionPhase, SessionState};
use crate::media::multipart::DEFAULT_BOUNDARY;
use crate::media::relay::DEFAULT_MAX_FRAME_SIZE;
use crate::media::transcoder::DEFAULT_READ_BUFFER;
use crate::media::{
    FrameAlignment, FrameRelay, Launcher, MultipartFramer, ProcessOutput, SignalCounters,
    TerminateOutcome, TranscoderProcess,
};
use crate::registry::{RegistryError, SessionHandle, SessionRegistry};
use crate::stats::ServerCounters;

/// Frames between periodic progress logs
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Why a session left the streaming loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Viewer went away
    ClientDisconnect,
    /// Response sink rejected a part
    WriteFailure,
    /// Transcoder exited, its output failed, or it reported a fatal error
    UpstreamFailure(String),
    /// Transcoder could not be started
    SpawnError(String),
    /// Server-wide termination
    Shutdown,
}

impl CloseReason {
    /// Whether the session ends `Failed` when no part was delivered
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CloseReason::UpstreamFailure(_) | CloseReason::SpawnError(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientDisconnect => write!(f, "client disconnected"),
            CloseReason::WriteFailure => write!(f, "write failed"),
            CloseReason::UpstreamFailure(detail) => write!(f, "upstream failure: {}", detail),
            CloseReason::SpawnError(detail) => write!(f, "spawn error: {}", detail),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Per-session tunables, derived from the server configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Wait between polite termination and a forced kill
    pub grace_window: Duration,
    /// Size of a single transcoder stdout read
    pub read_buffer_size: usize,
    /// How process output is cut into parts
    pub alignment: FrameAlignment,
    /// Largest unterminated frame held before it is flushed
    pub max_frame_size: usize,
    /// Multipart boundary token
    pub boundary: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(2),
            read_buffer_size: DEFAULT_READ_BUFFER,
            alignment: FrameAlignment::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

/// Final report of a session
#[derive(Debug)]
pub struct SessionOutcome {
    /// Terminal phase
    pub phase: SessionPhase,
    /// What ended the streaming loop
    pub reason: CloseReason,
    /// Parts delivered
    pub frames: u64,
    /// Result of stopping the transcoder, if one was started
    pub terminate: Option<TerminateOutcome>,
    /// Termination counters of the transcoder, if one was started
    pub signals: Option<Arc<SignalCounters>>,
}

/// A viewer session
pub struct ClientSession<L: Launcher> {
    context: SessionContext,
    state: Arc<SessionState>,
    cancel: CancellationToken,
    launcher: Arc<L>,
    settings: SessionSettings,
    sink: mpsc::Sender<Bytes>,
    registry: Arc<SessionRegistry>,
    counters: Arc<ServerCounters>,
}

impl<L: Launcher> ClientSession<L> {
    /// Create a session in `Starting`
    ///
    /// `sink` feeds the HTTP response body; dropping its receiver is how a
    /// disconnect reaches the session.
    pub fn new(
        context: SessionContext,
        launcher: Arc<L>,
        settings: SessionSettings,
        sink: mpsc::Sender<Bytes>,
        registry: Arc<SessionRegistry>,
        counters: Arc<ServerCounters>,
    ) -> Self {
        counters.session_started();

        Self {
            context,
            state: Arc::new(SessionState::new()),
            cancel: CancellationToken::new(),
            launcher,
            settings,
            sink,
            registry,
            counters,
        }
    }

    /// Session identity
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Shared state
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Registry entry for this session
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(
            self.context.clone(),
            Arc::clone(&self.state),
            self.cancel.clone(),
        )
    }

    /// Add this session to the registry
    pub async fn register(&self) -> Result<(), RegistryError> {
        self.registry.register(self.handle()).await
    }

    /// Run until terminal
    pub async fn run(self) -> SessionOutcome {
        tracing::info!(
            session_id = self.context.session_id,
            camera = %self.context.camera_name(),
            peer = %self.context.peer_addr,
            "Session started"
        );

        let mut process = match TranscoderProcess::start(&*self.launcher, &self.context.camera) {
            Ok(process) => process.with_read_buffer(self.settings.read_buffer_size),
            Err(e) => {
                tracing::error!(
                    session_id = self.context.session_id,
                    camera = %self.context.camera_name(),
                    error = %e,
                    "Failed to start transcoder"
                );
                return self.close(None, CloseReason::SpawnError(e.to_string())).await;
            }
        };

        let reason = self.stream(&mut process).await;
        self.close(Some(process), reason).await
    }

    /// Pump process output to the sink until something ends the session
    async fn stream(&self, process: &mut TranscoderProcess) -> CloseReason {
        let framer = MultipartFramer::new(
            self.settings.boundary.clone(),
            self.context.camera.part_content_type.clone(),
        );
        let mut relay = FrameRelay::new(self.settings.alignment, self.settings.max_frame_size);

        loop {
            let output = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,
                _ = self.sink.closed() => return CloseReason::ClientDisconnect,
                output = process.next_output() => output,
            };

            match output {
                Ok(ProcessOutput::Chunk(chunk)) => {
                    for frame in relay.push(chunk) {
                        if let Err(reason) = self.deliver(&framer, &frame).await {
                            return reason;
                        }
                    }
                }
                Ok(ProcessOutput::Diagnostic(line)) if line.is_fatal() => {
                    return CloseReason::UpstreamFailure(line.text);
                }
                Ok(ProcessOutput::Diagnostic(line)) => {
                    tracing::warn!(
                        session_id = self.context.session_id,
                        line = %line.text,
                        "Transcoder reported an error"
                    );
                }
                Ok(ProcessOutput::Closed) => {
                    if let Some(frame) = relay.finish() {
                        if let Err(reason) = self.deliver(&framer, &frame).await {
                            return reason;
                        }
                    }
                    // Output is gone; the process may still be running
                    let exited = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return CloseReason::Shutdown,
                        _ = self.sink.closed() => return CloseReason::ClientDisconnect,
                        exit = tokio::time::timeout(self.settings.grace_window, process.wait_exit()) => exit,
                    };
                    return match exited {
                        Ok(exit) => {
                            CloseReason::UpstreamFailure(format!("transcoder exited with {}", exit))
                        }
                        Err(_) => CloseReason::UpstreamFailure(
                            "transcoder closed its output".to_string(),
                        ),
                    };
                }
                Err(e) => {
                    return CloseReason::UpstreamFailure(format!("transcoder read failed: {}", e));
                }
            }
        }
    }

    /// Frame one payload and hand it to the sink
    ///
    /// A part is sent whole or not at all.
    async fn deliver(&self, framer: &MultipartFramer, payload: &[u8]) -> Result<(), CloseReason> {
        let part = framer.encode_part(payload);
        let len = part.len();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CloseReason::Shutdown),
            sent = self.sink.send(part) => {
                if sent.is_err() {
                    return Err(CloseReason::WriteFailure);
                }
            }
        }

        let frames = self.state.record_frame(len);
        if frames == 1 {
            self.state.mark_streaming();
            tracing::info!(
                session_id = self.context.session_id,
                camera = %self.context.camera_name(),
                "First frame sent"
            );
        } else if frames % PROGRESS_LOG_INTERVAL == 0 {
            tracing::debug!(
                session_id = self.context.session_id,
                frames = frames,
                bytes = self.state.bytes(),
                "Streaming"
            );
        }

        Ok(())
    }

    /// The single cleanup path
    async fn close(self, process: Option<TranscoderProcess>, reason: CloseReason) -> SessionOutcome {
        let session_id = self.context.session_id;
        let signals = process.as_ref().map(TranscoderProcess::signal_counters);

        if !self.state.begin_closing() {
            return SessionOutcome {
                phase: self.state.phase(),
                reason,
                frames: self.state.frames(),
                terminate: None,
                signals,
            };
        }

        let terminate = match &process {
            Some(process) => Some(process.terminate(self.settings.grace_window).await),
            None => None,
        };

        // Ends the response body
        drop(self.sink);
        self.registry.unregister(session_id).await;

        let frames = self.state.frames();
        let terminal = if frames == 0 && reason.is_failure() {
            SessionPhase::Failed
        } else {
            SessionPhase::Closed
        };
        self.state.finish(terminal);
        if terminal == SessionPhase::Failed {
            self.counters.session_failed();
        }

        let stats = self.state.stats();
        tracing::info!(
            session_id = session_id,
            camera = %self.context.camera_name(),
            phase = %terminal,
            reason = %reason,
            frames = stats.frames_sent,
            bytes = stats.bytes_sent,
            duration_ms = stats.duration.as_millis() as u64,
            "Session closed"
        );

        SessionOutcome {
            phase: terminal,
            reason,
            frames,
            terminate,
            signals,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::net::SocketAddr;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::media::multipart::tests::parse_parts;
    use crate::media::ProcessExit;
    use crate::testing::{camera, ScriptLauncher};

    struct Harness {
        registry: Arc<SessionRegistry>,
        counters: Arc<ServerCounters>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(SessionRegistry::new()),
                counters: Arc::new(ServerCounters::new()),
            }
        }

        async fn start(
            &self,
            id: u64,
            script: &str,
            alignment: FrameAlignment,
        ) -> (
            Arc<SessionState>,
            mpsc::Receiver<Bytes>,
            JoinHandle<SessionOutcome>,
        ) {
            let peer: SocketAddr = format!("127.0.0.1:{}", 40000 + id).parse().unwrap();
            let context = SessionContext::new(id, peer, Arc::new(camera("cam", "/cam")));
            let settings = SessionSettings {
                grace_window: Duration::from_secs(2),
                alignment,
                ..Default::default()
            };
            let (tx, rx) = mpsc::channel(4);

            let session = ClientSession::new(
                context,
                Arc::new(ScriptLauncher::streaming(script)),
                settings,
                tx,
                Arc::clone(&self.registry),
                Arc::clone(&self.counters),
            );
            session.register().await.unwrap();
            let state = Arc::clone(session.state());

            (state, rx, tokio::spawn(session.run()))
        }
    }

    const COUNTER_SCRIPT: &str = "i=0; while :; do i=$((i+1)); printf 'c%04d' $i; sleep 0.01; done";

    #[tokio::test]
    async fn test_streams_then_client_disconnects() {
        let harness = Harness::new();
        let (state, mut rx, task) = harness.start(1, COUNTER_SCRIPT, FrameAlignment::Chunk).await;

        let mut body = Vec::new();
        let mut parts = 0;
        while parts < 50 {
            let part = rx.recv().await.unwrap();
            body.extend_from_slice(&part);
            parts += 1;
        }
        assert_eq!(state.phase(), SessionPhase::Streaming);
        drop(rx);

        let outcome = task.await.unwrap();

        assert_eq!(outcome.phase, SessionPhase::Closed);
        // Depending on timing the loss is seen idle or mid-send
        assert!(matches!(
            outcome.reason,
            CloseReason::ClientDisconnect | CloseReason::WriteFailure
        ));
        assert!(outcome.frames >= 50);
        assert_eq!(
            outcome.terminate,
            Some(TerminateOutcome::Exited(ProcessExit {
                code: None,
                signal: Some(libc::SIGTERM),
            }))
        );
        let signals = outcome.signals.unwrap();
        assert_eq!(signals.terminate_calls(), 1);
        assert_eq!(signals.polite(), 1);
        assert_eq!(signals.forced(), 0);
        assert!(harness.registry.is_empty().await);

        // Counters in the payloads strictly increase with no gaps
        let payload: Vec<u8> = parse_parts(DEFAULT_BOUNDARY, &body).concat();
        let text = String::from_utf8(payload).unwrap();
        let counters: Vec<u32> = text
            .split('c')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap())
            .collect();
        assert!(counters.len() >= 50);
        assert!(counters.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(counters[0], 1);
    }

    #[tokio::test]
    async fn test_exit_before_output_fails() {
        let harness = Harness::new();
        let (_, mut rx, task) = harness.start(2, "exit 1", FrameAlignment::Jpeg).await;

        let outcome = task.await.unwrap();

        assert_eq!(outcome.phase, SessionPhase::Failed);
        assert!(matches!(outcome.reason, CloseReason::UpstreamFailure(_)));
        assert_eq!(outcome.frames, 0);
        assert!(matches!(
            outcome.terminate,
            Some(TerminateOutcome::AlreadyExited(_))
        ));
        // Body ends without any partial part
        assert_eq!(rx.recv().await, None);
        assert!(harness.registry.is_empty().await);
        assert_eq!(harness.counters.snapshot(0).failed_sessions, 1);
    }

    #[tokio::test]
    async fn test_exit_with_output_held_open_fails() {
        let harness = Harness::new();
        let (state, _rx, task) = harness.start(4, "sleep 30 & exit 1", FrameAlignment::Jpeg).await;

        let outcome = tokio::time::timeout(Duration::from_secs(4), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.phase, SessionPhase::Failed);
        assert_eq!(state.phase(), SessionPhase::Failed);
        assert_eq!(
            outcome.reason,
            CloseReason::UpstreamFailure("transcoder exited with code 1".to_string())
        );
        assert!(harness.registry.list_active().await.is_empty());
        assert!(harness.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_after_output_closed() {
        let harness = Harness::new();
        // Closes stdout but keeps running
        let (_, rx, task) = harness.start(5, "exec 1>&-; exec sleep 30", FrameAlignment::Jpeg).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(4), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.reason, CloseReason::ClientDisconnect);
        assert_eq!(outcome.phase, SessionPhase::Closed);
        assert_eq!(
            outcome.terminate,
            Some(TerminateOutcome::Exited(ProcessExit {
                code: None,
                signal: Some(libc::SIGTERM),
            }))
        );
        assert_eq!(outcome.signals.unwrap().terminate_calls(), 1);
        assert!(harness.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_after_output_closed() {
        let harness = Harness::new();
        let (_, _rx, task) = harness.start(6, "exec 1>&-; exec sleep 30", FrameAlignment::Jpeg).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        let report = harness.registry.broadcast_terminate(Duration::from_secs(4)).await;

        assert_eq!(report.completed, 1);
        let outcome = task.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::Shutdown);
        assert!(harness.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_spawn_error_fails() {
        let harness = Harness::new();
        let registry = Arc::clone(&harness.registry);
        let counters = Arc::clone(&harness.counters);

        struct Missing;
        impl Launcher for Missing {
            fn stream_command(&self, _camera: &crate::catalog::CameraSpec) -> tokio::process::Command {
                tokio::process::Command::new("/nonexistent/transcoder-binary")
            }
            fn snapshot_command(
                &self,
                _camera: &crate::catalog::CameraSpec,
                _output: &std::path::Path,
                _settings: &crate::media::SnapshotSettings,
            ) -> tokio::process::Command {
                tokio::process::Command::new("/nonexistent/transcoder-binary")
            }
        }

        let (tx, mut rx) = mpsc::channel(4);
        let session = ClientSession::new(
            SessionContext::new(3, "127.0.0.1:1".parse().unwrap(), Arc::new(camera("cam", "/cam"))),
            Arc::new(Missing),
            SessionSettings::default(),
            tx,
            registry,
            counters,
        );
        session.register().await.unwrap();

        let outcome = session.run().await;

        assert_eq!(outcome.phase, SessionPhase::Failed);
        assert!(matches!(outcome.reason, CloseReason::SpawnError(_)));
        assert!(outcome.terminate.is_none());
        assert_eq!(rx.recv().await, None);
        assert!(harness.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let harness = Harness::new();
        let (state_a, mut rx_a, task_a) = harness.start(10, COUNTER_SCRIPT, FrameAlignment::Chunk).await;
        let (state_b, mut rx_b, task_b) = harness.start(11, COUNTER_SCRIPT, FrameAlignment::Chunk).await;

        for _ in 0..5 {
            rx_a.recv().await.unwrap();
            rx_b.recv().await.unwrap();
        }
        assert_eq!(harness.registry.active_count().await, 2);

        // Ending A leaves B streaming
        harness.registry.get(10).await.unwrap().signal_terminate();
        let outcome_a = task_a.await.unwrap();
        assert_eq!(outcome_a.reason, CloseReason::Shutdown);
        assert_eq!(state_a.phase(), SessionPhase::Closed);

        let before = state_b.frames();
        for _ in 0..5 {
            rx_b.recv().await.unwrap();
        }
        assert!(state_b.frames() > before);
        assert_eq!(state_b.phase(), SessionPhase::Streaming);

        drop(rx_b);
        let outcome_b = task_b.await.unwrap();
        assert_eq!(outcome_b.phase, SessionPhase::Closed);
        assert_eq!(outcome_b.signals.unwrap().terminate_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_close_triggers_terminate_once() {
        let harness = Harness::new();
        let (_, mut rx, task) = harness.start(20, COUNTER_SCRIPT, FrameAlignment::Chunk).await;
        rx.recv().await.unwrap();

        // Disconnect and shutdown land together
        let handle = harness.registry.get(20).await.unwrap();
        drop(rx);
        handle.signal_terminate();

        let outcome = task.await.unwrap();

        assert_eq!(outcome.phase, SessionPhase::Closed);
        assert_eq!(outcome.signals.unwrap().terminate_calls(), 1);
        assert!(harness.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_fatal_diagnostic_closes_session() {
        let harness = Harness::new();
        let script = "echo 'rtsp://cam: Connection refused' >&2; exec sleep 30";
        let (_, _rx, task) = harness.start(30, script, FrameAlignment::Jpeg).await;

        let outcome = task.await.unwrap();

        assert_eq!(outcome.phase, SessionPhase::Failed);
        assert_eq!(
            outcome.reason,
            CloseReason::UpstreamFailure("rtsp://cam: Connection refused".to_string())
        );
        assert!(matches!(outcome.terminate, Some(TerminateOutcome::Exited(_))));
    }

    #[tokio::test]
    async fn test_jpeg_alignment_delivers_whole_images() {
        let harness = Harness::new();
        // Two images split mid-marker across writes
        let script = r"printf '\377\330AB\377'; sleep 0.05; printf '\331\377\330CD\377\331'; exec sleep 30";
        let (_, mut rx, task) = harness.start(40, script, FrameAlignment::Jpeg).await;

        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(&rx.recv().await.unwrap());
        }
        drop(rx);
        task.await.unwrap();

        let parts = parse_parts(DEFAULT_BOUNDARY, &body);
        assert_eq!(
            parts,
            vec![
                vec![0xFF, 0xD8, b'A', b'B', 0xFF, 0xD9],
                vec![0xFF, 0xD8, b'C', b'D', 0xFF, 0xD9],
            ]
        );
    }

    #[tokio::test]
    async fn test_broadcast_terminate_stops_sessions() {
        let harness = Harness::new();
        let (_, mut rx_a, task_a) = harness.start(50, COUNTER_SCRIPT, FrameAlignment::Chunk).await;
        let (_, mut rx_b, task_b) = harness.start(51, COUNTER_SCRIPT, FrameAlignment::Chunk).await;
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        let report = harness
            .registry
            .broadcast_terminate(Duration::from_secs(5))
            .await;

        assert_eq!(report.signalled, 2);
        assert_eq!(report.completed, 2);
        for task in [task_a, task_b] {
            let outcome = task.await.unwrap();
            assert_eq!(outcome.reason, CloseReason::Shutdown);
            assert_eq!(outcome.signals.unwrap().polite(), 1);
        }
        assert!(harness.registry.is_empty().await);
    }
}
