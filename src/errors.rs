//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Wire framing or message parsing failure on a kernel channel.
    Channel(String),
    /// Kernel process could not be spawned; the session was not installed.
    Startup(String),
    /// Kernel process is alive but never confirmed ready within the window.
    ReadinessTimeout(String),
    /// No session exists for the requested key.
    SessionNotFound(String),
    /// Session exists but its kernel is not ready to accept code yet.
    NotReady(String),
    /// Kernel process liveness check failed; the session must be reset.
    KernelDied(String),
    /// Submitted code raised an error inside the kernel.
    ///
    /// This is a normal outcome of user-submitted code, not a system fault.
    /// The traceback is carried verbatim for the caller.
    Execution {
        /// Kernel-reported traceback lines.
        traceback: Vec<String>,
    },
    /// No protocol message arrived within the per-message window.
    ExecutionTimeout(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Startup(msg) => write!(f, "kernel startup: {msg}"),
            Self::ReadinessTimeout(msg) => write!(f, "readiness timeout: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::NotReady(msg) => write!(f, "kernel not ready: {msg}"),
            Self::KernelDied(msg) => write!(f, "kernel died: {msg}"),
            Self::Execution { traceback } => {
                write!(f, "execution error: {}", traceback.join("\n"))
            }
            Self::ExecutionTimeout(msg) => write!(f, "execution timeout: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
