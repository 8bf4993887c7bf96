//! HTTP boundary layer.
//!
//! A thin axum router over the [`SessionRegistry`]: each route parses the
//! request, invokes one registry operation, and translates the outcome into
//! a status code and JSON body. No session or kernel logic lives here.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalConfig;
use crate::kernel::process::{KernelCommand, ProcessKernel};
use crate::session::registry::SessionRegistry;
use crate::{AppError, Result};

/// Shared state handed to every route handler.
pub struct AppState {
    /// Session registry all routes operate on.
    pub registry: Arc<SessionRegistry>,
    /// Global configuration (kernel command line, ports, timeouts).
    pub config: Arc<GlobalConfig>,
}

/// Form payload for the session-lifecycle routes.
#[derive(Debug, Deserialize)]
struct SessionForm {
    /// Owning user/tenant identifier; the session key.
    user_id: String,
}

/// JSON payload for the execute route.
#[derive(Debug, Deserialize)]
struct ExecuteBody {
    /// Owning user/tenant identifier; the session key.
    user_id: String,
    /// Code snippet to execute.
    code: String,
}

/// Build the application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start_session", post(start_session))
        .route("/execute", post(execute))
        .route("/reset", post(reset_session))
        .route("/end_session", post(end_session))
        .with_state(state)
}

/// Serve the router until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot be bound or the server
/// fails.
pub async fn serve(state: Arc<AppState>, cancel: CancellationToken) -> Result<()> {
    let bind = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;

    info!(%bind, "HTTP boundary listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Config(format!("HTTP server error: {err}")))?;

    info!("HTTP boundary shut down");
    Ok(())
}

// ── Route handlers ───────────────────────────────────────────────────────────

async fn start_session(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SessionForm>,
) -> Response {
    let kernel = Box::new(ProcessKernel::new(KernelCommand {
        program: state.config.kernel_cmd.clone(),
        args: state.config.kernel_args.clone(),
        workdir: state.config.session_dir(&form.user_id),
    }));

    match state.registry.create_session(&form.user_id, kernel).await {
        Ok(path) => Json(json!({
            "message": "Session started successfully",
            "notebook_path": path,
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn execute(State(state): State<Arc<AppState>>, Json(body): Json<ExecuteBody>) -> Response {
    let session = match state.registry.get_session(&body.user_id).await {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };

    let outcome = session.lock().await.execute_code(&body.code).await;
    match outcome {
        Ok(output) => Json(json!({ "output": output })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SessionForm>,
) -> Response {
    match state.registry.reset_session(&form.user_id).await {
        Ok(()) => Json(json!({ "message": "Kernel reset successful" })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SessionForm>,
) -> Response {
    match state.registry.end_session(&form.user_id).await {
        Ok(()) => Json(json!({ "message": "Session ended successfully" })).into_response(),
        Err(err) => error_response(&err),
    }
}

// ── Error translation ────────────────────────────────────────────────────────

/// Map a domain error to its HTTP status code.
#[must_use]
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        AppError::Execution { .. } => StatusCode::BAD_REQUEST,
        AppError::ExecutionTimeout(_) => StatusCode::REQUEST_TIMEOUT,
        AppError::Config(_)
        | AppError::Io(_)
        | AppError::Channel(_)
        | AppError::Startup(_)
        | AppError::ReadinessTimeout(_)
        | AppError::NotReady(_)
        | AppError::KernelDied(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render a domain error as an HTTP response.
///
/// Execution errors carry their traceback in the body; everything else
/// reports the display string.
fn error_response(err: &AppError) -> Response {
    let status = status_for(err);
    let body = match err {
        AppError::Execution { traceback } => json!({
            "error": "Execution error",
            "traceback": traceback,
        }),
        other => json!({ "error": other.to_string() }),
    };
    (status, Json(body)).into_response()
}
