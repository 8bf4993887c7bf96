//! End-to-end session lifecycle scenario over the registry.

use std::sync::Arc;

use codecell::session::SessionRegistry;
use codecell::AppError;

use crate::common::{self, busy, error, idle, result, MockKernel};

/// Create → execute → user error → execute → out-of-band death → reset →
/// execute → end, all against one session key.
#[tokio::test(start_paused = true)]
async fn full_session_lifecycle() {
    let root = tempfile::tempdir().expect("tempdir");
    let registry = SessionRegistry::new(Arc::new(common::test_config(root.path())));
    let (kernel, state) = MockKernel::boxed();

    // ── Start ───────────────────────────────────────────
    let artifact = registry
        .create_session("u1", kernel)
        .await
        .expect("create_session");
    assert!(artifact.exists());

    // ── Execute: 1+1 → "2" ──────────────────────────────
    state
        .lock()
        .expect("lock")
        .scripts
        .push_back(vec![busy(), result("2"), idle()]);
    let session = registry.get_session("u1").await.expect("get_session");
    let output = session.lock().await.execute_code("1+1").await.expect("execute");
    assert!(output.contains('2'));
    drop(session);

    // ── Execute: user code raises ───────────────────────
    state
        .lock()
        .expect("lock")
        .scripts
        .push_back(vec![busy(), error("ValueError", "x"), idle()]);
    let session = registry.get_session("u1").await.expect("get_session");
    let err = session
        .lock()
        .await
        .execute_code("raise ValueError('x')")
        .await
        .expect_err("user error must fail the call");
    let AppError::Execution { traceback } = err else {
        panic!("expected Execution error, got {err:?}");
    };
    assert!(traceback.iter().any(|line| line.contains("ValueError")));
    drop(session);

    // ── Execute again: the session stays usable ─────────
    let session = registry.get_session("u1").await.expect("get_session");
    let output = session.lock().await.execute_code("1+1").await.expect("execute");
    assert_eq!(output, "2");
    drop(session);

    // ── Kill the kernel out-of-band ─────────────────────
    state.lock().expect("lock").alive = false;
    let session = registry.get_session("u1").await.expect("get_session");
    let err = session.lock().await.execute_code("1+1").await;
    assert!(matches!(err, Err(AppError::KernelDied(_))), "got {err:?}");
    drop(session);

    // ── Reset heals the session ─────────────────────────
    registry.reset_session("u1").await.expect("reset_session");
    assert!(state.lock().expect("lock").restarts >= 1);

    let session = registry.get_session("u1").await.expect("get_session");
    let output = session.lock().await.execute_code("1+1").await.expect("execute");
    assert_eq!(output, "2");
    drop(session);

    // ── End ─────────────────────────────────────────────
    registry.end_session("u1").await.expect("end_session");
    assert!(matches!(
        registry.get_session("u1").await,
        Err(AppError::SessionNotFound(_))
    ));
    assert!(!artifact.exists(), "artifact must be removed at termination");
}
