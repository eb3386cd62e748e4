//! Subprocess adapter: one tool-server child process with newline-delimited
//! JSON-RPC framing over stdio.
//!
//! Key design decisions:
//! - Raw `tokio::process::Command` with all three stdio streams piped; a
//!   BufReader task re-frames stdout and drops non-JSON lines so a noisy
//!   child cannot corrupt the pipe.
//! - Writes go through a bounded channel drained by a single stdin task,
//!   which serializes frames and applies backpressure when the pipe fills.
//! - Shutdown escalates SIGTERM → SIGKILL with a configurable grace period.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use mcplink_core::domain::{ServerDefinition, ServerKind};

use crate::error::BridgeError;

/// Frames buffered toward the child's stdin before senders block.
pub const WRITE_BUFFER_FRAMES: usize = 64;

/// Frames buffered from the child's stdout before the pump pauses.
pub const READ_BUFFER_FRAMES: usize = 64;

/// Default gateway executable for `http` definitions.
const HTTP_GATEWAY_COMMAND: &str = "mcp-proxy";

/// One complete frame read from the child's stdout: the raw line (what gets
/// forwarded, byte for byte) plus its parsed form (what gets inspected).
#[derive(Debug, Clone)]
pub struct OutFrame {
    pub text: String,
    pub value: Value,
}

enum KillSignal {
    Term,
    Kill,
}

/// A running tool-server child with framed stdio.
pub struct SubprocessAdapter {
    name: String,
    pid: Option<u32>,
    writer_tx: mpsc::Sender<String>,
    frames_rx: mpsc::Receiver<OutFrame>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    kill_tx: mpsc::Sender<KillSignal>,
}

impl SubprocessAdapter {
    /// Spawn the child described by `definition` and start the stdio pumps.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Spawn` when the process cannot be started;
    /// this is terminal for the attempt and the caller retries with
    /// backoff.
    pub fn spawn(definition: &ServerDefinition) -> Result<Self, BridgeError> {
        let mut command = build_command(definition);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| BridgeError::Spawn {
            name: definition.name.clone(),
            source,
        })?;

        let name = definition.name.clone();
        let pid = child.id();
        info!(server = %name, pid, "started server process");

        let stdin = child.stdin.take().ok_or_else(|| BridgeError::Spawn {
            name: name.clone(),
            source: std::io::Error::other("stdin was not piped"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::Spawn {
            name: name.clone(),
            source: std::io::Error::other("stdout was not piped"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| BridgeError::Spawn {
            name: name.clone(),
            source: std::io::Error::other("stderr was not piped"),
        })?;

        // Stdin task: drains the write channel, one frame per line.
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(WRITE_BUFFER_FRAMES);
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = writer_rx.recv().await {
                if stdin.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Stdout task: re-frames lines into JSON values. Non-JSON lines are
        // dropped; a partial line at EOF is discarded.
        let (frames_tx, frames_rx) = mpsc::channel::<OutFrame>(READ_BUFFER_FRAMES);
        let stdout_name = name.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) if !line.ends_with('\n') => {
                        warn!(
                            server = %stdout_name,
                            bytes = line.len(),
                            "discarding partial line at stdout EOF"
                        );
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim_end_matches(['\n', '\r']);
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(trimmed) {
                            Ok(value) => {
                                let frame = OutFrame {
                                    text: trimmed.to_string(),
                                    value,
                                };
                                if frames_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(server = %stdout_name, error = %e, "dropping non-JSON stdout line");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(server = %stdout_name, error = %e, "stdout read failed");
                        break;
                    }
                }
            }
            debug!(server = %stdout_name, "stdout pump finished");
        });

        // Stderr task: diagnostic text straight to the log.
        let stderr_name = name.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(server = %stderr_name, "{line}");
            }
        });

        // Wait task: owns the child, reaps it, and services kill requests.
        // The select result is bound first so the wait future (which
        // borrows the child) is gone before any signal is delivered.
        let (exit_tx, exit_rx) = watch::channel::<Option<ExitStatus>>(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<KillSignal>(2);
        let wait_name = name.clone();
        tokio::spawn(async move {
            enum WaitEvent {
                Exited(std::io::Result<ExitStatus>),
                Signal(Option<KillSignal>),
            }

            loop {
                let event = tokio::select! {
                    status = child.wait() => WaitEvent::Exited(status),
                    signal = kill_rx.recv() => WaitEvent::Signal(signal),
                };
                match event {
                    WaitEvent::Exited(Ok(status)) => {
                        info!(server = %wait_name, %status, "server process exited");
                        let _ = exit_tx.send(Some(status));
                        break;
                    }
                    WaitEvent::Exited(Err(e)) => {
                        warn!(server = %wait_name, error = %e, "failed to reap server process");
                        let _ = exit_tx.send(None);
                        break;
                    }
                    WaitEvent::Signal(Some(KillSignal::Term)) => terminate(&mut child, &wait_name),
                    WaitEvent::Signal(Some(KillSignal::Kill) | None) => {
                        let _ = child.start_kill();
                    }
                }
            }
        });

        Ok(Self {
            name,
            pid,
            writer_tx,
            frames_rx,
            exit_rx,
            kill_tx,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// A cloneable handle for writing frames to the child's stdin. Sends
    /// block when the buffer is full.
    #[must_use]
    pub fn writer(&self) -> mpsc::Sender<String> {
        self.writer_tx.clone()
    }

    /// Receive the next complete frame from the child's stdout; `None`
    /// once the stream has ended.
    pub async fn next_frame(&mut self) -> Option<OutFrame> {
        self.frames_rx.recv().await
    }

    /// Watch for child exit. The value becomes `Some(status)` when the
    /// child has been reaped.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit_rx.clone()
    }

    /// Stop the child: SIGTERM, wait up to `grace`, then SIGKILL.
    pub async fn shutdown(self, grace: Duration) {
        let mut exit = self.exit_rx.clone();
        if exit.borrow().is_some() {
            return;
        }

        let _ = self.kill_tx.send(KillSignal::Term).await;
        if timeout(grace, exit.wait_for(Option::is_some)).await.is_ok() {
            return;
        }

        warn!(server = %self.name, "grace period elapsed, escalating to SIGKILL");
        let _ = self.kill_tx.send(KillSignal::Kill).await;
        let _ = timeout(Duration::from_secs(2), exit.wait_for(Option::is_some)).await;
    }
}

/// Graceful termination request. On unix this is SIGTERM so the child can
/// flush and exit; elsewhere the only option is a hard kill.
#[cfg(unix)]
fn terminate(child: &mut tokio::process::Child, name: &str) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    #[allow(clippy::cast_possible_wrap)]
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // ESRCH means the child already exited; the wait arm will reap it.
        if e != nix::errno::Errno::ESRCH {
            warn!(server = %name, error = %e, "failed to signal server process");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut tokio::process::Child, _name: &str) {
    let _ = child.start_kill();
}

/// Build the command line for a definition. Stdio servers run their own
/// command; http servers run a local gateway that bridges stdio to the
/// remote URL.
fn build_command(definition: &ServerDefinition) -> Command {
    let mut command = match definition.kind {
        ServerKind::Stdio => {
            let mut command =
                Command::new(definition.command.as_deref().unwrap_or_default());
            command.args(&definition.args);
            command
        }
        ServerKind::Http => {
            let gateway = definition.command.as_deref().unwrap_or(HTTP_GATEWAY_COMMAND);
            let mut command = Command::new(gateway);
            command.args(["--transport", "streamable-http"]);
            for (key, value) in &definition.headers {
                command.args(["-H", key, value]);
            }
            command.arg(definition.url.as_deref().unwrap_or_default());
            command
        }
    };
    command.envs(&definition.env);
    command
}
