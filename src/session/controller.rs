//! Kernel session controller.
//!
//! Owns one external kernel process and drives single code executions
//! through its asynchronous, multi-message broadcast protocol: readiness
//! probing, residual-message draining, per-message receive timeouts, death
//! detection, and restart. One controller per session key; callers serialize
//! access (the registry wraps each controller in a `Mutex`).

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::kernel::{ExecutionState, Kernel, KernelMessage};
use crate::session::notebook;
use crate::{AppError, Result};

/// Kernel readiness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No process has been started yet.
    Uninitialized,
    /// Process spawned; readiness not yet confirmed.
    Starting,
    /// Readiness confirmed; code may be executed.
    Ready,
    /// Process death detected or session terminated; reset required.
    Dead,
}

/// Controller for one kernel process and its two channels.
pub struct KernelSession {
    dir: PathBuf,
    artifact: Option<PathBuf>,
    readiness: Readiness,
    kernel: Box<dyn Kernel>,
    probe: String,
    timeouts: TimeoutConfig,
}

impl std::fmt::Debug for KernelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSession")
            .field("dir", &self.dir)
            .field("artifact", &self.artifact)
            .field("readiness", &self.readiness)
            .field("probe", &self.probe)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl KernelSession {
    /// Build a controller around `kernel` rooted at `dir`.
    ///
    /// `probe` is the side-effect-free expression round-tripped during
    /// readiness checks. Nothing is started until [`create`](Self::create).
    #[must_use]
    pub fn new(
        kernel: Box<dyn Kernel>,
        dir: PathBuf,
        probe: String,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            dir,
            artifact: None,
            readiness: Readiness::Uninitialized,
            kernel,
            probe,
            timeouts,
        }
    }

    /// Current readiness state.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// Whether the kernel is confirmed ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    /// Write the notebook artifact, start the kernel process, and open its
    /// channels. Returns the artifact path.
    ///
    /// The session transitions to `Starting`; call
    /// [`wait_until_ready`](Self::wait_until_ready) before executing code.
    ///
    /// # Errors
    ///
    /// - [`AppError::Io`] if the session directory or artifact cannot be
    ///   written.
    /// - [`AppError::Startup`] if the kernel process cannot be spawned.
    pub async fn create(&mut self, name: &str) -> Result<PathBuf> {
        let path = notebook::write_empty(&self.dir, name)?;
        self.kernel.start().await?;
        self.readiness = Readiness::Starting;
        self.artifact = Some(path.clone());
        info!(artifact = %path.display(), "kernel session created");
        Ok(path)
    }

    /// Probe until the kernel confirms readiness or `timeout` elapses.
    ///
    /// The kernel emits no single deterministic ready signal, so readiness
    /// is inferred by round-tripping the probe expression and watching for an
    /// idle status on the broadcast channel. Probe failures are logged and
    /// treated as transient; only the overall deadline is surfaced. Residual
    /// messages are drained once readiness is confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ReadinessTimeout`] when the deadline passes
    /// without confirmation. This is recoverable; callers may retry or
    /// [`reset`](Self::reset).
    pub async fn wait_until_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        while self.readiness != Readiness::Ready {
            if Instant::now() >= deadline {
                return Err(AppError::ReadinessTimeout(format!(
                    "kernel failed to become ready within {timeout:?}"
                )));
            }

            match self.probe_once().await {
                Ok(true) => {
                    self.readiness = Readiness::Ready;
                    debug!("kernel readiness confirmed");
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    // Transient channel noise during startup is expected.
                    warn!(%err, "kernel readiness probe error");
                }
            }

            tokio::time::sleep(self.timeouts.poll()).await;
        }

        self.drain().await?;
        Ok(())
    }

    /// Execute `code` and return its concatenated textual output.
    ///
    /// Residual broadcast messages from a previous (possibly timed-out) call
    /// are discarded before submission so no output bleeds between
    /// executions. Messages are then consumed one at a time; the per-message
    /// window resets on every message received, so slow-but-steady output
    /// never times out.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotReady`] — readiness was never confirmed; wait or reset.
    /// - [`AppError::KernelDied`] — the process is gone; the session is
    ///   marked dead and must be reset.
    /// - [`AppError::Execution`] — the submitted code raised; carries the
    ///   kernel traceback. The channel is drained to idle first.
    /// - [`AppError::ExecutionTimeout`] — no message within the per-message
    ///   window; the process may be hung.
    pub async fn execute_code(&mut self, code: &str) -> Result<String> {
        if self.readiness != Readiness::Ready {
            return Err(AppError::NotReady(
                "kernel not ready; wait for initialization or reset the session".into(),
            ));
        }

        if !self.kernel.is_alive().await.unwrap_or(false) {
            self.readiness = Readiness::Dead;
            return Err(AppError::KernelDied(
                "kernel process is gone; reset the session".into(),
            ));
        }

        self.drain().await?;
        self.kernel.submit(code).await?;

        let mut outputs: Vec<String> = Vec::new();
        let mut failure: Option<Vec<String>> = None;

        loop {
            let Some(message) = self.kernel.receive(self.timeouts.message()).await? else {
                return Err(AppError::ExecutionTimeout(format!(
                    "no kernel message within {:?}",
                    self.timeouts.message()
                )));
            };

            match message {
                KernelMessage::Stream { text } => outputs.push(text),
                KernelMessage::ExecuteResult { text } => outputs.push(text.unwrap_or_default()),
                KernelMessage::DisplayData { text } => {
                    if let Some(rendered) = text {
                        if !rendered.is_empty() {
                            outputs.push(rendered);
                        }
                    }
                }
                KernelMessage::Error {
                    ename,
                    evalue,
                    traceback,
                } => {
                    // Keep draining until idle so the channel is left clean;
                    // the call still fails once the kernel settles.
                    let traceback = if traceback.is_empty() {
                        vec![format!("{ename}: {evalue}")]
                    } else {
                        traceback
                    };
                    warn!(ename, "execution raised inside kernel");
                    failure = Some(traceback);
                }
                KernelMessage::Status {
                    state: ExecutionState::Idle,
                } => {
                    if let Some(traceback) = failure {
                        return Err(AppError::Execution { traceback });
                    }
                    break;
                }
                KernelMessage::Status { .. } => {}
            }
        }

        Ok(outputs.join("\n"))
    }

    /// Restart the kernel process and wait for it to become ready again.
    ///
    /// No-op when the session was never created. Used for explicit
    /// caller-requested resets and for self-healing when a lookup finds the
    /// session not ready.
    ///
    /// # Errors
    ///
    /// - [`AppError::Startup`] if the replacement process cannot be spawned.
    /// - [`AppError::ReadinessTimeout`] if it never confirms readiness.
    pub async fn reset(&mut self) -> Result<()> {
        if self.readiness == Readiness::Uninitialized {
            return Ok(());
        }

        info!("resetting kernel");
        self.readiness = Readiness::Starting;
        self.kernel.restart().await?;
        self.wait_until_ready(self.timeouts.startup()).await
    }

    /// Tear the session down: close channels, force-stop the process, and
    /// remove the on-disk artifact.
    ///
    /// Idempotent and safe on never-started or already-dead sessions. No
    /// graceful-shutdown grace period is given; resource release is
    /// guaranteed over kernel-side cleanup.
    pub async fn terminate(&mut self) {
        self.readiness = Readiness::Dead;

        if let Err(err) = self.kernel.shutdown(true).await {
            warn!(%err, "kernel shutdown failed during terminate");
        }

        if let Some(path) = self.artifact.take() {
            if let Err(err) = notebook::remove(&path) {
                warn!(%err, artifact = %path.display(), "failed to remove session artifact");
            }
        }
    }

    /// One readiness probe round-trip.
    ///
    /// Returns `Ok(true)` when an idle status was observed, `Ok(false)` when
    /// the drain emptied without one (a transient miss, not a failure).
    async fn probe_once(&mut self) -> Result<bool> {
        if !self.kernel.is_alive().await? {
            return Ok(false);
        }

        let probe = self.probe.clone();
        self.kernel.submit(&probe).await?;

        loop {
            match self.kernel.receive(self.timeouts.drain()).await? {
                Some(KernelMessage::Status {
                    state: ExecutionState::Idle,
                }) => return Ok(true),
                Some(_) => {}
                None => return Ok(false),
            }
        }
    }

    /// Discard residual broadcast messages left over from a previous call.
    ///
    /// Best-effort cleanup with a short per-poll window; a straggling reply
    /// from an earlier timed-out execution may be truncated rather than
    /// delivered.
    async fn drain(&mut self) -> Result<()> {
        while self
            .kernel
            .receive(self.timeouts.drain())
            .await?
            .is_some()
        {}
        Ok(())
    }
}
