//! Kernel wire envelopes.
//!
//! One JSON object per line in both directions. Broadcast lines
//! (kernel → controller) carry a `msg_type` discriminator and a
//! type-specific `content` object; submission lines
//! (controller → kernel) carry the execution id and the code to run.
//!
//! # Known broadcast message types
//!
//! | `msg_type`       | Maps to                                    |
//! |------------------|--------------------------------------------|
//! | `stream`         | [`KernelMessage::Stream`]                  |
//! | `execute_result` | [`KernelMessage::ExecuteResult`]           |
//! | `display_data`   | [`KernelMessage::DisplayData`]             |
//! | `error`          | [`KernelMessage::Error`]                   |
//! | `status`         | [`KernelMessage::Status`]                  |
//! | *(any other)*    | Skipped; logged at `DEBUG`                 |

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExecutionState, KernelMessage};
use crate::{AppError, Result};

// ── Broadcast envelope (kernel → controller) ─────────────────────────────────

/// Top-level broadcast message envelope.
#[derive(Debug, Deserialize)]
struct BroadcastEnvelope {
    /// Message type discriminator (e.g. `stream`, `status`).
    msg_type: String,
    /// Type-specific payload.
    #[serde(default)]
    content: serde_json::Value,
}

/// Content of a `stream` message.
#[derive(Debug, Deserialize)]
struct StreamContent {
    text: String,
}

/// Content of an `execute_result` or `display_data` message.
#[derive(Debug, Deserialize)]
struct DataContent {
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

impl DataContent {
    /// Best available plain-text rendering from the data bundle.
    fn text_plain(&self) -> Option<String> {
        self.data
            .get("text/plain")
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned)
    }
}

/// Content of an `error` message.
#[derive(Debug, Deserialize)]
struct ErrorContent {
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

/// Content of a `status` message.
#[derive(Debug, Deserialize)]
struct StatusContent {
    execution_state: String,
}

// ── Submission envelope (controller → kernel) ────────────────────────────────

/// Control-channel submission envelope.
#[derive(Debug, Serialize)]
pub struct ExecuteRequest<'a> {
    /// Message type discriminator, always `execute_request`.
    pub msg_type: &'static str,
    /// Execution id correlating replies to this submission.
    pub msg_id: &'a str,
    /// Code to execute.
    pub code: &'a str,
}

impl<'a> ExecuteRequest<'a> {
    /// Build a submission envelope for `code` under `msg_id`.
    #[must_use]
    pub fn new(msg_id: &'a str, code: &'a str) -> Self {
        Self {
            msg_type: "execute_request",
            msg_id,
            code,
        }
    }

    /// Serialize to a single NDJSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Channel`] if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Channel(format!("failed to serialise submission: {e}")))
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse one broadcast NDJSON line into a [`KernelMessage`].
///
/// # Return value
///
/// - `Ok(Some(message))` — the line is a recognized, complete message.
/// - `Ok(None)` — the line is empty/whitespace or has an unknown `msg_type`
///   (silently skipped; unknown types are logged at `DEBUG` level).
/// - `Err(AppError::Channel(...))` — not valid JSON, or a known type with a
///   missing required field.
///
/// # Errors
///
/// - [`AppError::Channel`]`("malformed json: …")` — not valid JSON.
/// - [`AppError::Channel`]`("missing required field: …")` — recognized type
///   with an absent required content field.
pub fn parse_broadcast_line(line: &str) -> Result<Option<KernelMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: BroadcastEnvelope = serde_json::from_str(line)
        .map_err(|e| AppError::Channel(format!("malformed json: {e}")))?;

    match envelope.msg_type.as_str() {
        "stream" => {
            let content: StreamContent = parse_content("stream", envelope.content)?;
            Ok(Some(KernelMessage::Stream { text: content.text }))
        }
        "execute_result" => {
            let content: DataContent = parse_content("execute_result", envelope.content)?;
            Ok(Some(KernelMessage::ExecuteResult {
                text: content.text_plain(),
            }))
        }
        "display_data" => {
            let content: DataContent = parse_content("display_data", envelope.content)?;
            Ok(Some(KernelMessage::DisplayData {
                text: content.text_plain(),
            }))
        }
        "error" => {
            let content: ErrorContent = parse_content("error", envelope.content)?;
            Ok(Some(KernelMessage::Error {
                ename: content.ename,
                evalue: content.evalue,
                traceback: content.traceback,
            }))
        }
        "status" => {
            let content: StatusContent = parse_content("status", envelope.content)?;
            Ok(parse_execution_state(&content.execution_state)
                .map(|state| KernelMessage::Status { state }))
        }
        other => {
            debug!(msg_type = other, "skipping unknown broadcast message type");
            Ok(None)
        }
    }
}

fn parse_content<T: serde::de::DeserializeOwned>(
    msg_type: &str,
    content: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(content)
        .map_err(|e| AppError::Channel(format!("missing required field: {msg_type} content: {e}")))
}

/// Map the wire execution-state string to [`ExecutionState`].
///
/// Unknown states are skipped (`None`) rather than failing the stream.
fn parse_execution_state(raw: &str) -> Option<ExecutionState> {
    match raw {
        "busy" => Some(ExecutionState::Busy),
        "idle" => Some(ExecutionState::Idle),
        "starting" => Some(ExecutionState::Starting),
        other => {
            debug!(state = other, "skipping unknown execution state");
            None
        }
    }
}
