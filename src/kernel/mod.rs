//! Kernel process abstraction.
//!
//! The [`Kernel`] trait decouples the session controller from the mechanics
//! of driving an external interactive-compute process. A kernel exposes two
//! logical channels: a control channel accepting code submissions and a
//! broadcast channel delivering typed output and state events. The
//! production implementation, [`process::ProcessKernel`], spawns a child
//! process and speaks newline-delimited JSON over its stdio; tests script a
//! mock against the same trait.

pub mod codec;
pub mod process;
pub mod wire;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::Result;

/// Boxed future returned by [`Kernel`] trait methods.
pub type KernelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Kernel execution state carried by status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Kernel is processing a submission.
    Busy,
    /// Kernel has finished processing and has no pending output.
    Idle,
    /// Kernel is still completing its own internal startup.
    Starting,
}

/// Typed message received on the kernel's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelMessage {
    /// Incremental stdout/stderr text produced by running code.
    Stream {
        /// Text fragment, appended to the output accumulator verbatim.
        text: String,
    },
    /// Final value of an executed expression.
    ExecuteResult {
        /// Best available plain-text rendering, if any.
        text: Option<String>,
    },
    /// Rich display output (plots, tables) emitted mid-execution.
    DisplayData {
        /// Best available plain-text rendering, if any.
        text: Option<String>,
    },
    /// The submitted code raised an error inside the kernel.
    Error {
        /// Exception class name.
        ename: String,
        /// Exception message.
        evalue: String,
        /// Full formatted traceback lines.
        traceback: Vec<String>,
    },
    /// Kernel execution-state transition.
    Status {
        /// New execution state.
        state: ExecutionState,
    },
}

/// Interface to one external interactive-compute process.
///
/// A kernel is exclusively owned by one session controller; methods take
/// `&mut self` and access is never concurrent. All waits inside
/// implementations must be cooperative suspension points.
pub trait Kernel: Send {
    /// Spawn the external process and open both channels.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Startup`](crate::AppError::Startup) if the process
    /// cannot be spawned.
    fn start(&mut self) -> KernelFuture<'_, ()>;

    /// Whether the external process is currently running.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) if the process status
    /// cannot be queried.
    fn is_alive(&mut self) -> KernelFuture<'_, bool>;

    /// Kill the current process and start a fresh one with new channels.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Startup`](crate::AppError::Startup) if the
    /// replacement process cannot be spawned.
    fn restart(&mut self) -> KernelFuture<'_, ()>;

    /// Stop the process, immediately or after a short bounded wait.
    ///
    /// Idempotent; safe to call on a never-started kernel.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) if the kill fails.
    fn shutdown(&mut self, immediate: bool) -> KernelFuture<'_, ()>;

    /// Submit code on the control channel, returning an execution id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Channel`](crate::AppError::Channel) if the
    /// submission cannot be written.
    fn submit(&mut self, code: &str) -> KernelFuture<'_, String>;

    /// Receive the next broadcast-channel message, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when no message arrives within the window or the
    /// channel has closed; process death is observed via [`Kernel::is_alive`],
    /// not through this method.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Channel`](crate::AppError::Channel) on framing or
    /// parse failures that poison the stream.
    fn receive(&mut self, timeout: Duration) -> KernelFuture<'_, Option<KernelMessage>>;
}
