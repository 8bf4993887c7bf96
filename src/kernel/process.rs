//! Child-process kernel implementation.
//!
//! Spawns the configured kernel executable with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist so server-side secrets are
//!   never visible inside the kernel process.
//! - Piped stdio: the control channel is NDJSON written to the child's
//!   stdin, the broadcast channel is NDJSON read from its stdout by a
//!   dedicated reader task and delivered through a bounded [`mpsc`] queue.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec::ChannelCodec;
use super::wire::{parse_broadcast_line, ExecuteRequest};
use super::{Kernel, KernelFuture, KernelMessage};
use crate::{AppError, Result};

/// Capacity of the broadcast-channel delivery queue.
const BROADCAST_QUEUE: usize = 256;

/// Bound on the wait for a voluntary exit during non-immediate shutdown.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Environment variables inherited by the spawned kernel process.
///
/// Every other variable from the server's environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TMPDIR",
    "PYTHONPATH",
    "VIRTUAL_ENV",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "COMSPEC",
];

/// Command line used to launch kernel processes.
#[derive(Debug, Clone)]
pub struct KernelCommand {
    /// Kernel executable (e.g. `python3`).
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory the kernel starts in; must exist before `start`.
    pub workdir: PathBuf,
}

/// Live process state: child handle plus both channel endpoints.
struct LiveProcess {
    child: Child,
    control: FramedWrite<ChildStdin, ChannelCodec>,
    broadcast: mpsc::Receiver<KernelMessage>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// [`Kernel`] implementation backed by a spawned child process.
pub struct ProcessKernel {
    command: KernelCommand,
    proc: Option<LiveProcess>,
}

impl ProcessKernel {
    /// Create a kernel for `command` without starting it.
    #[must_use]
    pub fn new(command: KernelCommand) -> Self {
        Self {
            command,
            proc: None,
        }
    }

    async fn start_impl(&mut self) -> Result<()> {
        // A leftover process from a previous start is replaced, never leaked.
        self.stop_impl(true).await?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args);

        // Strip inherited environment, then inject only the safe allowlist.
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        cmd.current_dir(&self.command.workdir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Startup(format!("failed to spawn kernel: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Startup("failed to capture kernel stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Startup("failed to capture kernel stdout".into()))?;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(BROADCAST_QUEUE);
        let reader = tokio::spawn(run_broadcast_reader(stdout, tx, cancel.clone()));

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr, cancel.clone()));
        }

        debug!(program = %self.command.program, "kernel process spawned");

        self.proc = Some(LiveProcess {
            child,
            control: FramedWrite::new(stdin, ChannelCodec::new()),
            broadcast: rx,
            cancel,
            reader,
        });

        Ok(())
    }

    async fn stop_impl(&mut self, immediate: bool) -> Result<()> {
        let Some(mut live) = self.proc.take() else {
            return Ok(());
        };

        // Stop the reader and close the control channel (child stdin).
        live.cancel.cancel();
        drop(live.control);

        if !immediate {
            match tokio::time::timeout(EXIT_GRACE, live.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(?status, "kernel process exited within grace period");
                    live.reader.abort();
                    return Ok(());
                }
                Ok(Err(err)) => {
                    warn!(%err, "error waiting for kernel process exit");
                }
                Err(_elapsed) => {
                    warn!("kernel process did not exit within grace period, killing");
                }
            }
        }

        live.child
            .kill()
            .await
            .map_err(|err| AppError::Io(format!("failed to kill kernel process: {err}")))?;
        live.reader.abort();

        Ok(())
    }
}

impl Kernel for ProcessKernel {
    fn start(&mut self) -> KernelFuture<'_, ()> {
        Box::pin(self.start_impl())
    }

    fn is_alive(&mut self) -> KernelFuture<'_, bool> {
        Box::pin(async move {
            let Some(live) = self.proc.as_mut() else {
                return Ok(false);
            };
            match live.child.try_wait() {
                Ok(None) => Ok(true),
                Ok(Some(status)) => {
                    debug!(?status, "kernel process has exited");
                    Ok(false)
                }
                Err(err) => Err(AppError::Io(format!(
                    "failed to poll kernel process status: {err}"
                ))),
            }
        })
    }

    fn restart(&mut self) -> KernelFuture<'_, ()> {
        Box::pin(async move {
            self.stop_impl(true).await?;
            self.start_impl().await
        })
    }

    fn shutdown(&mut self, immediate: bool) -> KernelFuture<'_, ()> {
        Box::pin(self.stop_impl(immediate))
    }

    fn submit(&mut self, code: &str) -> KernelFuture<'_, String> {
        let msg_id = Uuid::new_v4().to_string();
        let line = ExecuteRequest::new(&msg_id, code).to_line();
        Box::pin(async move {
            let line = line?;
            let live = self
                .proc
                .as_mut()
                .ok_or_else(|| AppError::Channel("kernel is not started".into()))?;
            live.control
                .send(line)
                .await
                .map_err(|err| AppError::Channel(format!("failed to submit code: {err}")))?;
            Ok(msg_id)
        })
    }

    fn receive(&mut self, timeout: Duration) -> KernelFuture<'_, Option<KernelMessage>> {
        Box::pin(async move {
            let Some(live) = self.proc.as_mut() else {
                return Ok(None);
            };
            match tokio::time::timeout(timeout, live.broadcast.recv()).await {
                Ok(Some(msg)) => Ok(Some(msg)),
                // Window elapsed or reader ended; both read as "no message".
                Ok(None) | Err(_) => Ok(None),
            }
        })
    }
}

/// Broadcast reader task — decodes NDJSON lines from the kernel's stdout and
/// forwards typed messages through `tx`.
///
/// Malformed or unrecognised lines are logged and skipped; they do not
/// terminate the reader. The task exits on EOF, I/O error, cancellation, or
/// when the receiving side is dropped.
async fn run_broadcast_reader(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<KernelMessage>,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(stdout, ChannelCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("broadcast reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("broadcast reader: EOF on kernel stdout");
                        break;
                    }
                    Some(Err(AppError::Channel(ref msg))) => {
                        warn!(error = msg.as_str(), "broadcast reader: framing error, skipping");
                    }
                    Some(Err(err)) => {
                        warn!(%err, "broadcast reader: IO error, stopping");
                        break;
                    }
                    Some(Ok(line)) => match parse_broadcast_line(&line) {
                        Ok(Some(message)) => {
                            if tx.send(message).await.is_err() {
                                debug!("broadcast reader: receiver dropped, stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(%err, raw_line = %line, "broadcast reader: parse error, skipping");
                        }
                    },
                }
            }
        }
    }
}

/// Drain the kernel's stderr, logging each line at debug level.
async fn drain_stderr(stderr: tokio::process::ChildStderr, cancel: CancellationToken) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(text)) => debug!(target: "codecell::kernel_stderr", "{text}"),
                Ok(None) | Err(_) => break,
            },
        }
    }
}
