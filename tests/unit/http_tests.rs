//! Unit tests for HTTP error translation.

use axum::http::StatusCode;

use codecell::http::status_for;
use codecell::AppError;

#[test]
fn session_not_found_maps_to_404() {
    assert_eq!(
        status_for(&AppError::SessionNotFound("u1".into())),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn execution_error_maps_to_400() {
    assert_eq!(
        status_for(&AppError::Execution {
            traceback: vec!["ValueError: x".into()]
        }),
        StatusCode::BAD_REQUEST
    );
}

#[test]
fn execution_timeout_maps_to_408() {
    assert_eq!(
        status_for(&AppError::ExecutionTimeout("10s".into())),
        StatusCode::REQUEST_TIMEOUT
    );
}

#[test]
fn system_faults_map_to_500() {
    let faults = [
        AppError::Config("x".into()),
        AppError::Io("x".into()),
        AppError::Channel("x".into()),
        AppError::Startup("x".into()),
        AppError::ReadinessTimeout("x".into()),
        AppError::NotReady("x".into()),
        AppError::KernelDied("x".into()),
    ];
    for err in faults {
        assert_eq!(
            status_for(&err),
            StatusCode::INTERNAL_SERVER_ERROR,
            "wrong status for {err:?}"
        );
    }
}
