//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Configurable timeout values (seconds / milliseconds) for kernel protocol waits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Whole-operation bound for the initial readiness wait after startup.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// Shorter readiness bound used when a lookup finds a not-ready session.
    #[serde(default = "default_lookup_ready_seconds")]
    pub lookup_ready_seconds: u64,
    /// Per-message receive window during code execution; resets on every message.
    #[serde(default = "default_message_seconds")]
    pub message_seconds: u64,
    /// Short per-poll window used when draining residual channel messages.
    #[serde(default = "default_drain_millis")]
    pub drain_millis: u64,
    /// Cooperative yield between readiness probe attempts.
    #[serde(default = "default_poll_millis")]
    pub poll_millis: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_seconds: default_startup_seconds(),
            lookup_ready_seconds: default_lookup_ready_seconds(),
            message_seconds: default_message_seconds(),
            drain_millis: default_drain_millis(),
            poll_millis: default_poll_millis(),
        }
    }
}

impl TimeoutConfig {
    /// Whole-operation readiness bound as a [`Duration`].
    #[must_use]
    pub fn startup(&self) -> Duration {
        Duration::from_secs(self.startup_seconds)
    }

    /// Lookup-time readiness bound as a [`Duration`].
    #[must_use]
    pub fn lookup_ready(&self) -> Duration {
        Duration::from_secs(self.lookup_ready_seconds)
    }

    /// Per-message receive window as a [`Duration`].
    #[must_use]
    pub fn message(&self) -> Duration {
        Duration::from_secs(self.message_seconds)
    }

    /// Residual-drain poll window as a [`Duration`].
    #[must_use]
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_millis)
    }

    /// Inter-probe yield as a [`Duration`].
    #[must_use]
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_millis)
    }
}

fn default_startup_seconds() -> u64 {
    30
}

fn default_lookup_ready_seconds() -> u64 {
    10
}

fn default_message_seconds() -> u64 {
    10
}

fn default_drain_millis() -> u64 {
    100
}

fn default_poll_millis() -> u64 {
    100
}

/// Idle-session reclamation thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReclaimConfig {
    /// Period between reclamation scans.
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    /// Idle time after which a session is reclaimed.
    #[serde(default = "default_idle_threshold_seconds")]
    pub idle_threshold_seconds: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: default_scan_interval_seconds(),
            idle_threshold_seconds: default_idle_threshold_seconds(),
        }
    }
}

impl ReclaimConfig {
    /// Scan period as a [`Duration`].
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    /// Idle threshold as a [`Duration`].
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_seconds)
    }
}

fn default_scan_interval_seconds() -> u64 {
    300
}

fn default_idle_threshold_seconds() -> u64 {
    3600
}

fn default_http_port() -> u16 {
    8000
}

fn default_kernel_args() -> Vec<String> {
    vec!["-u".into(), "-m".into(), "codecell_kernel".into()]
}

fn default_readiness_probe() -> String {
    "1+1".into()
}

fn default_setup_code() -> String {
    "import pandas as pd\nimport numpy as np\nimport matplotlib.pyplot as plt\n".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory under which each session gets its own working subdirectory.
    pub sessions_dir: PathBuf,
    /// Kernel executable launched for every session (e.g. `python3`).
    pub kernel_cmd: String,
    /// Arguments passed to the kernel executable.
    #[serde(default = "default_kernel_args")]
    pub kernel_args: Vec<String>,
    /// HTTP port the boundary layer listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Side-effect-free expression round-tripped to confirm kernel readiness.
    #[serde(default = "default_readiness_probe")]
    pub readiness_probe: String,
    /// Standard imports executed once after session creation and after reset.
    #[serde(default = "default_setup_code")]
    pub setup_code: String,
    /// Kernel protocol timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Idle reclamation settings.
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Working directory assigned to a session key.
    #[must_use]
    pub fn session_dir(&self, key: &str) -> PathBuf {
        self.sessions_dir.join(key)
    }

    fn validate(&self) -> Result<()> {
        if self.kernel_cmd.is_empty() {
            return Err(AppError::Config("kernel_cmd must not be empty".into()));
        }

        if self.readiness_probe.is_empty() {
            return Err(AppError::Config(
                "readiness_probe must not be empty".into(),
            ));
        }

        if self.reclaim.scan_interval_seconds == 0 {
            return Err(AppError::Config(
                "reclaim.scan_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.message_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.message_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
