//! Encoder process lifecycle.
//!
//! Every encoder invocation goes through [`EncoderProcess`]: a child
//! spawned without a console window, its stderr drained into a bounded
//! [`StderrTail`], and a shutdown that always ends with the process gone
//! (graceful request, bounded wait, then forced termination).

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdtile_common::error::{RdtileError, RdtileResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, Command};
use tokio::task::JoinHandle;

/// Lines of encoder stderr kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 50;

/// An encoder that exits within this window after spawning failed to start.
pub const IMMEDIATE_EXIT_PROBE: Duration = Duration::from_millis(250);

const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Bounded, thread-safe buffer of the most recent stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(STDERR_TAIL_LINES)
    }
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Forget everything captured so far (a new process is starting).
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Captured lines joined for inclusion in an error message.
    pub fn render(&self) -> String {
        let lines = self.lock();
        if lines.is_empty() {
            return "<no encoder output>".to_string();
        }
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        // A panicked writer cannot leave the deque inconsistent.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// How to ask a running encoder to finish before it is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracefulStop {
    /// Write ffmpeg's interactive quit key to stdin.
    QuitCommand,
    /// Close stdin so a piped input reaches end-of-stream.
    CloseStdin,
    /// The process finishes by itself; only wait.
    WaitOnly,
    /// Terminate right away.
    Kill,
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited on its own (possibly with a failure code).
    Exited(ExitStatus),
    /// Did not exit within the timeout, or was told to stop immediately.
    Killed,
    /// Waiting on the process failed; it was killed.
    Lost,
}

impl ShutdownOutcome {
    /// True when the process exited by itself with status zero.
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Exited(status) if status.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ShutdownOutcome::Exited(status) => status.code(),
            _ => None,
        }
    }
}

/// Build a command for the encoder executable.
///
/// The child has no console window, discards stdout, pipes stderr, and is
/// killed if its handle is dropped.
pub fn encoder_command(program: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    {
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

/// A running encoder child with its stderr pump.
#[derive(Debug)]
pub struct EncoderProcess {
    label: &'static str,
    child: Child,
    stdin: Option<ChildStdin>,
    tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl EncoderProcess {
    /// Spawn `command`, resetting `tail` and draining stderr into it.
    ///
    /// Stdin is detached from the child handle right away so waiting on
    /// the process never closes it implicitly.
    pub fn spawn(
        label: &'static str,
        mut command: Command,
        tail: StderrTail,
    ) -> RdtileResult<Self> {
        tail.reset();
        let mut child = command.spawn().map_err(|e| {
            RdtileError::process(format!("Failed to start {label} encoder: {e}"))
        })?;

        tracing::debug!(encoder = label, pid = child.id(), "Encoder process started");

        let stdin = child.stdin.take();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_pump(label, stderr, tail.clone()));

        Ok(Self {
            label,
            child,
            stdin,
            tail,
            stderr_task,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn tail(&self) -> &StderrTail {
        &self.tail
    }

    /// Hand the input pipe to a writer. `None` if stdin was not piped.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Wait briefly for an early exit.
    ///
    /// `Some(status)` means the encoder already died, i.e. it failed to
    /// start; the stderr tail is complete when this returns.
    pub async fn exited_within(&mut self, window: Duration) -> RdtileResult<Option<ExitStatus>> {
        match tokio::time::timeout(window, self.child.wait()).await {
            Err(_) => Ok(None),
            Ok(Ok(status)) => {
                self.drain_stderr().await;
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(RdtileError::process(format!(
                "Failed to query {} encoder: {e}",
                self.label
            ))),
        }
    }

    /// Stop the process: graceful request, bounded wait, then kill.
    pub async fn shutdown(mut self, graceful: GracefulStop, timeout: Duration) -> ShutdownOutcome {
        match graceful {
            GracefulStop::QuitCommand => {
                if let Some(mut stdin) = self.stdin.take() {
                    if let Err(e) = stdin.write_all(b"q").await {
                        tracing::debug!(encoder = self.label, error = %e, "Quit command not delivered");
                    }
                    let _ = stdin.flush().await;
                }
            }
            GracefulStop::CloseStdin => drop(self.stdin.take()),
            GracefulStop::WaitOnly => {}
            GracefulStop::Kill => {
                self.kill().await;
                self.drain_stderr().await;
                return ShutdownOutcome::Killed;
            }
        }

        let outcome = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => ShutdownOutcome::Exited(status),
            Ok(Err(e)) => {
                tracing::warn!(encoder = self.label, error = %e, "Lost track of encoder; killing");
                self.kill().await;
                ShutdownOutcome::Lost
            }
            Err(_) => {
                tracing::warn!(
                    encoder = self.label,
                    timeout_ms = timeout.as_millis() as u64,
                    "Encoder did not exit in time; killing"
                );
                self.kill().await;
                ShutdownOutcome::Killed
            }
        };
        drop(self.stdin.take());
        self.drain_stderr().await;

        tracing::debug!(encoder = self.label, ?outcome, "Encoder process finished");
        outcome
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(encoder = self.label, error = %e, "Encoder kill failed");
        }
    }

    /// Let the stderr pump reach end-of-stream so the tail is complete.
    async fn drain_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await.is_err() {
                tracing::debug!(encoder = self.label, "Stderr pump still open after exit");
            }
        }
    }
}

fn spawn_stderr_pump(label: &'static str, stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::trace!(encoder = label, "{line}");
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(encoder = label, error = %e, "Stderr pump stopped");
                    break;
                }
            }
        }
    })
}

/// Run an encoder invocation that finishes by itself, bounded by `timeout`.
///
/// Returns the exit status, or an error carrying the stderr tail when the
/// process could not be started or had to be killed.
pub async fn run_to_completion(
    label: &'static str,
    command: Command,
    timeout: Duration,
) -> RdtileResult<ExitStatus> {
    let tail = StderrTail::default();
    let process = EncoderProcess::spawn(label, command, tail.clone())?;
    match process.shutdown(GracefulStop::WaitOnly, timeout).await {
        ShutdownOutcome::Exited(status) => Ok(status),
        ShutdownOutcome::Killed => Err(RdtileError::process(format!(
            "{label} encoder timed out after {}s: {}",
            timeout.as_secs(),
            tail.render()
        ))),
        ShutdownOutcome::Lost => Err(RdtileError::process(format!(
            "{label} encoder was lost: {}",
            tail.render()
        ))),
    }
}

/// Remove a file, logging instead of failing.
pub(crate) async fn remove_file_logged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete file"),
    }
}
