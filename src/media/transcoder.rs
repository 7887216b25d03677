//! Transcoder process handle
//!
//! Owns one external transcoding process. The child itself lives in a
//! supervisor task which is the only place that signals and reaps it, so a
//! signal can never reach a recycled pid. The handle talks to the supervisor
//! over a control channel and observes termination through a watch channel
//! that is written exactly once.
//!
//! ```text
//!                 control (Terminate | Kill)
//!   TranscoderProcess ─────────────────────────► supervisor task
//!     │  ▲                                          │ owns Child
//!     │  └──────────── exit watch (set once) ◄──────┘ wait() / kill()
//!     │
//!     ├── stdout  ──► read_chunk()
//!     └── stderr  ──► diagnostics task ──► read_diagnostics()
//! ```

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::diagnostics::{DiagnosticLevel, DiagnosticLine};
use super::launcher::Launcher;
use crate::catalog::CameraSpec;

/// Default size of a single stdout read
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// Diagnostic lines buffered before non-fatal lines are dropped
const DIAGNOSTIC_CAPACITY: usize = 64;

/// How long stdout is still drained after the process has exited
const EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Error type for transcoder processes
#[derive(Debug)]
pub enum TranscoderError {
    /// Executable could not be launched (missing binary, permission denied)
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        source: io::Error,
    },
    /// A standard pipe was not captured
    MissingPipe(&'static str),
}

impl fmt::Display for TranscoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscoderError::Spawn { program, source } => {
                write!(f, "Failed to spawn {}: {}", program, source)
            }
            TranscoderError::MissingPipe(name) => write!(f, "Process {} not captured", name),
        }
    }
}

impl std::error::Error for TranscoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TranscoderError::Spawn { source, .. } => Some(source),
            TranscoderError::MissingPipe(_) => None,
        }
    }
}

/// Exit status of a transcoder process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if killed by one
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Exit could not be observed (wait failed)
    pub const UNKNOWN: ProcessExit = ProcessExit {
        code: None,
        signal: None,
    };

    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Result of a [`TranscoderProcess::terminate`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Exited within the grace window after the polite signal
    Exited(ProcessExit),
    /// Did not exit in time and was force-killed
    Killed(ProcessExit),
    /// Had already exited; nothing was sent
    AlreadyExited(ProcessExit),
    /// Another terminate call is (or was) in charge; nothing was sent
    AlreadyTerminating,
}

/// Counts of termination activity on one process
#[derive(Debug, Default)]
pub struct SignalCounters {
    terminate_calls: AtomicU32,
    polite: AtomicU32,
    forced: AtomicU32,
}

impl SignalCounters {
    /// Number of `terminate` invocations, including no-ops
    pub fn terminate_calls(&self) -> u32 {
        self.terminate_calls.load(Ordering::Relaxed)
    }

    /// Number of polite termination signals sent
    pub fn polite(&self) -> u32 {
        self.polite.load(Ordering::Relaxed)
    }

    /// Number of forceful kills sent
    pub fn forced(&self) -> u32 {
        self.forced.load(Ordering::Relaxed)
    }
}

/// Next piece of process output, whichever channel is ready first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Bytes from stdout
    Chunk(Bytes),
    /// Warning or fatal line from stderr
    Diagnostic(DiagnosticLine),
    /// Stdout closed
    Closed,
}

/// Commands for the supervisor task
#[derive(Debug, Clone, Copy)]
enum Control {
    Terminate,
    Kill,
}

/// Handle to one running transcoder process
///
/// Exclusively owned by a single client session. Dropping the handle without
/// terminating kills the process.
pub struct TranscoderProcess {
    pid: Option<u32>,
    stdout: ChildStdout,
    read_buf: BytesMut,
    read_buffer_size: usize,
    diagnostics: mpsc::Receiver<DiagnosticLine>,
    diagnostics_open: bool,
    drain_until: Option<Instant>,
    control: mpsc::UnboundedSender<Control>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    terminating: AtomicBool,
    signals: Arc<SignalCounters>,
}

impl TranscoderProcess {
    /// Start the streaming transcoder for a camera
    pub fn start<L: Launcher>(launcher: &L, camera: &CameraSpec) -> Result<Self, TranscoderError> {
        Self::spawn(launcher.stream_command(camera))
    }

    /// Spawn an arbitrary command as a transcoder
    ///
    /// Stdout and stderr are captured, stdin is closed. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(mut command: Command) -> Result<Self, TranscoderError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let mut child = command
            .spawn()
            .map_err(|source| TranscoderError::Spawn { program, source })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or(TranscoderError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TranscoderError::MissingPipe("stderr"))?;

        let (diag_tx, diag_rx) = mpsc::channel(DIAGNOSTIC_CAPACITY);
        tokio::spawn(forward_diagnostics(stderr, diag_tx));

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, control_rx, exit_tx));

        tracing::debug!(pid = ?pid, "Transcoder started");

        Ok(Self {
            pid,
            stdout,
            read_buf: BytesMut::new(),
            read_buffer_size: DEFAULT_READ_BUFFER,
            diagnostics: diag_rx,
            diagnostics_open: true,
            drain_until: None,
            control: control_tx,
            exit_rx,
            terminating: AtomicBool::new(false),
            signals: Arc::new(SignalCounters::default()),
        })
    }

    /// Set the size of a single stdout read
    pub fn with_read_buffer(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// OS process id at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Read the next chunk of output
    ///
    /// Returns `Ok(None)` once stdout is closed. Chunk boundaries are whatever
    /// the process flushed; they carry no framing meaning. Cancel safe.
    pub async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.read_buf.capacity() < self.read_buffer_size {
            self.read_buf.reserve(self.read_buffer_size);
        }

        let n = self.stdout.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Ok(None);
        }

        Ok(Some(self.read_buf.split().freeze()))
    }

    /// Next classified line from the process's error channel
    ///
    /// Returns `None` once stderr is closed. Cancel safe.
    pub async fn read_diagnostics(&mut self) -> Option<DiagnosticLine> {
        self.diagnostics.recv().await
    }

    /// Wait for stdout data or a diagnostic line
    ///
    /// Diagnostics are preferred when both are ready. Once stderr closes only
    /// stdout is awaited. `Closed` is returned at stdout EOF, or once the
    /// process has exited and stdout stays quiet (a descendant may hold the
    /// pipe open) for a short drain window. Cancel safe.
    pub async fn next_output(&mut self) -> io::Result<ProcessOutput> {
        if self.read_buf.capacity() < self.read_buffer_size {
            self.read_buf.reserve(self.read_buffer_size);
        }

        loop {
            let mut exit_rx = self.exit_rx.clone();
            let drain_until = self.drain_until;

            tokio::select! {
                biased;
                line = self.diagnostics.recv(), if self.diagnostics_open => match line {
                    Some(line) => return Ok(ProcessOutput::Diagnostic(line)),
                    None => self.diagnostics_open = false,
                },
                read = self.stdout.read_buf(&mut self.read_buf) => {
                    if read? == 0 {
                        return Ok(ProcessOutput::Closed);
                    }
                    return Ok(ProcessOutput::Chunk(self.read_buf.split().freeze()));
                }
                _ = exit_rx.wait_for(Option::is_some), if drain_until.is_none() => {
                    self.drain_until = Some(Instant::now() + EXIT_DRAIN);
                }
                _ = tokio::time::sleep_until(drain_until.unwrap_or_else(Instant::now)), if drain_until.is_some() => {
                    return Ok(ProcessOutput::Closed);
                }
            }
        }
    }

    /// Exit status, if the process has exited
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Subscribe to the exit event
    ///
    /// The value turns from `None` to `Some` exactly once.
    pub fn on_exit(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit_rx.clone()
    }

    /// Wait for the process to exit
    pub async fn wait_exit(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit.unwrap_or(ProcessExit::UNKNOWN)
    }

    /// Termination counters, shareable beyond the handle's lifetime
    pub fn signal_counters(&self) -> Arc<SignalCounters> {
        Arc::clone(&self.signals)
    }

    /// Politely terminate, escalating to a kill after `grace`
    ///
    /// Idempotent: only the first call sends signals; later calls and calls
    /// on an exited process are no-ops.
    pub async fn terminate(&self, grace: Duration) -> TerminateOutcome {
        self.signals.terminate_calls.fetch_add(1, Ordering::Relaxed);

        if self.terminating.swap(true, Ordering::AcqRel) {
            return TerminateOutcome::AlreadyTerminating;
        }

        if let Some(exit) = self.exit_status() {
            return TerminateOutcome::AlreadyExited(exit);
        }

        if self.control.send(Control::Terminate).is_err() {
            // Supervisor is gone, so the process has been reaped
            return TerminateOutcome::AlreadyExited(self.wait_exit().await);
        }
        self.signals.polite.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(grace, self.wait_exit()).await {
            Ok(exit) => TerminateOutcome::Exited(exit),
            Err(_) => {
                tracing::warn!(
                    pid = ?self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Transcoder ignored termination, killing"
                );
                self.signals.forced.fetch_add(1, Ordering::Relaxed);
                let _ = self.control.send(Control::Kill);
                TerminateOutcome::Killed(self.wait_exit().await)
            }
        }
    }
}

impl fmt::Debug for TranscoderProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscoderProcess")
            .field("pid", &self.pid)
            .field("exit", &self.exit_status())
            .finish()
    }
}

/// Own the child: deliver signals, reap it, publish the exit once
async fn supervise(
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<Control>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let mut control_open = true;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            cmd = control.recv(), if control_open => match cmd {
                Some(Control::Terminate) => send_polite(&mut child),
                Some(Control::Kill) => {
                    let _ = child.start_kill();
                }
                None => {
                    // Handle dropped without terminating
                    control_open = false;
                    let _ = child.start_kill();
                }
            },
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit::from(status),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to wait on transcoder");
            ProcessExit::UNKNOWN
        }
    };

    tracing::debug!(exit = %exit, "Transcoder exited");
    exit_tx.send_replace(Some(exit));
}

#[cfg(unix)]
fn send_polite(child: &mut Child) {
    // id() is None once reaped, so the pid cannot have been recycled
    if let Some(pid) = child.id() {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(
                pid = pid,
                error = %io::Error::last_os_error(),
                "SIGTERM delivery failed"
            );
        }
    }
}

#[cfg(not(unix))]
fn send_polite(child: &mut Child) {
    let _ = child.start_kill();
}

/// Drain stderr into classified lines; never blocks the process
async fn forward_diagnostics(stderr: ChildStderr, tx: mpsc::Sender<DiagnosticLine>) {
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = DiagnosticLine::classify(&line);
                if line.level == DiagnosticLevel::Info {
                    continue;
                }
                if line.is_fatal() {
                    // Waits for room; a closed receiver just drops it
                    let _ = tx.send(line).await;
                } else {
                    // Full or closed receiver: drop the line, keep draining
                    let _ = tx.try_send(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Transcoder stderr read failed");
                break;
            }
        }
    }
}
