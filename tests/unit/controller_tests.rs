//! Unit tests for the kernel session controller state machine.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codecell::kernel::KernelMessage;
use codecell::session::{KernelSession, Readiness};
use codecell::AppError;

use crate::common::{self, busy, error, idle, result, stream, MockKernel, MockState};

fn session_with_mock(dir: &Path) -> (KernelSession, Arc<Mutex<MockState>>) {
    let (kernel, state) = MockKernel::boxed();
    (
        KernelSession::new(
            kernel,
            dir.to_path_buf(),
            "1+1".into(),
            common::test_timeouts(),
        ),
        state,
    )
}

/// Create and confirm readiness, leaving the session ready for execution.
async fn ready_session(dir: &Path) -> (KernelSession, Arc<Mutex<MockState>>) {
    let (mut session, state) = session_with_mock(dir);
    session.create("nb").await.expect("create");
    session
        .wait_until_ready(Duration::from_secs(2))
        .await
        .expect("readiness");
    (session, state)
}

fn push_script(state: &Arc<Mutex<MockState>>, reply: Vec<KernelMessage>) {
    state.lock().expect("lock").scripts.push_back(reply);
}

#[tokio::test]
async fn create_starts_kernel_and_writes_artifact() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = session_with_mock(root.path());

    let artifact = session.create("notebook_u1").await.expect("create");

    assert!(artifact.exists());
    assert_eq!(session.readiness(), Readiness::Starting);
    assert!(state.lock().expect("lock").started);
}

#[tokio::test]
async fn create_spawn_failure_surfaces_startup_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = session_with_mock(root.path());
    state.lock().expect("lock").fail_start = true;

    let err = session.create("nb").await.expect_err("create must fail");
    assert!(matches!(err, AppError::Startup(_)), "got {err:?}");
    assert_eq!(session.readiness(), Readiness::Uninitialized);
}

#[tokio::test]
async fn wait_until_ready_confirms_via_probe_roundtrip() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = session_with_mock(root.path());
    session.create("nb").await.expect("create");

    session
        .wait_until_ready(Duration::from_secs(2))
        .await
        .expect("readiness");

    assert!(session.is_ready());
    let submissions = state.lock().expect("lock").submissions.clone();
    assert!(
        submissions.iter().any(|code| code == "1+1"),
        "probe expression must have been submitted; got {submissions:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn wait_until_ready_times_out_when_kernel_never_responds() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = session_with_mock(root.path());
    session.create("nb").await.expect("create");
    state.lock().expect("lock").mute = true;

    let err = session
        .wait_until_ready(Duration::from_secs(2))
        .await
        .expect_err("readiness must time out");

    assert!(matches!(err, AppError::ReadinessTimeout(_)), "got {err:?}");
    assert!(!session.is_ready());
}

#[tokio::test]
async fn execute_before_ready_fails_not_ready() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, _state) = session_with_mock(root.path());
    session.create("nb").await.expect("create");

    let err = session
        .execute_code("1+1")
        .await
        .expect_err("execute must fail before readiness");
    assert!(matches!(err, AppError::NotReady(_)), "got {err:?}");
}

#[tokio::test]
async fn execute_on_dead_kernel_fails_and_marks_session_dead() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    state.lock().expect("lock").alive = false;

    let err = session
        .execute_code("1+1")
        .await
        .expect_err("execute must fail on dead kernel");
    assert!(matches!(err, AppError::KernelDied(_)), "got {err:?}");
    assert_eq!(session.readiness(), Readiness::Dead);
}

#[tokio::test]
async fn execute_returns_output_fragments_in_arrival_order() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    push_script(
        &state,
        vec![busy(), stream("a"), stream("b"), result("2"), idle()],
    );

    let output = session.execute_code("print('ab'); 2").await.expect("execute");
    assert_eq!(output, "a\nb\n2");
}

#[tokio::test]
async fn execute_with_no_output_returns_empty_string() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    push_script(&state, vec![busy(), idle()]);

    let output = session.execute_code("x = 1").await.expect("execute");
    assert_eq!(output, "");
}

#[tokio::test]
async fn execute_discards_residual_output_from_previous_call() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    // Leftovers from an earlier, timed-out execution.
    state
        .lock()
        .expect("lock")
        .pending
        .push_back(stream("stale"));
    push_script(&state, vec![busy(), stream("fresh"), idle()]);

    let output = session.execute_code("print('fresh')").await.expect("execute");
    assert_eq!(output, "fresh");
    assert!(!output.contains("stale"));
}

#[tokio::test]
async fn user_error_fails_with_traceback_and_leaves_channel_clean() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    push_script(
        &state,
        vec![
            busy(),
            stream("partial"),
            error("ValueError", "x"),
            idle(),
        ],
    );

    let err = session
        .execute_code("raise ValueError('x')")
        .await
        .expect_err("execute must fail");

    let AppError::Execution { traceback } = err else {
        panic!("expected Execution error, got {err:?}");
    };
    assert!(
        traceback.iter().any(|line| line.contains("ValueError")),
        "traceback must mention ValueError; got {traceback:?}"
    );
    assert!(
        state.lock().expect("lock").pending.is_empty(),
        "channel must be drained to idle after an error"
    );
}

#[tokio::test]
async fn session_remains_usable_after_user_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    push_script(&state, vec![busy(), error("ValueError", "x"), idle()]);
    let err = session.execute_code("raise ValueError('x')").await;
    assert!(err.is_err());

    // Default script: a successful evaluation of "2".
    let output = session.execute_code("1+1").await.expect("execute after error");
    assert_eq!(output, "2");
}

#[tokio::test]
async fn execute_times_out_when_kernel_goes_silent() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    state.lock().expect("lock").mute = true;

    let err = session
        .execute_code("while True: pass")
        .await
        .expect_err("execute must time out");
    assert!(matches!(err, AppError::ExecutionTimeout(_)), "got {err:?}");
}

#[tokio::test]
async fn display_data_is_appended_only_when_nonempty() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    push_script(
        &state,
        vec![
            busy(),
            KernelMessage::DisplayData {
                text: Some("<Figure size 640x480>".into()),
            },
            KernelMessage::DisplayData { text: Some(String::new()) },
            KernelMessage::DisplayData { text: None },
            idle(),
        ],
    );

    let output = session.execute_code("plt.plot()").await.expect("execute");
    assert_eq!(output, "<Figure size 640x480>");
}

#[tokio::test]
async fn reset_is_a_noop_before_create() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = session_with_mock(root.path());

    session.reset().await.expect("reset");
    assert_eq!(state.lock().expect("lock").restarts, 0);
    assert_eq!(session.readiness(), Readiness::Uninitialized);
}

#[tokio::test]
async fn reset_restarts_kernel_and_reconfirms_readiness() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    // Simulate an out-of-band kernel death.
    state.lock().expect("lock").alive = false;
    let _ = session.execute_code("1+1").await;
    assert_eq!(session.readiness(), Readiness::Dead);

    session.reset().await.expect("reset");

    assert!(session.is_ready());
    assert_eq!(state.lock().expect("lock").restarts, 1);

    let output = session.execute_code("1+1").await.expect("execute after reset");
    assert_eq!(output, "2");
}

#[tokio::test]
async fn reset_propagates_respawn_failure() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = ready_session(root.path()).await;

    state.lock().expect("lock").fail_start = true;
    let err = session.reset().await.expect_err("reset must fail");
    assert!(matches!(err, AppError::Startup(_)), "got {err:?}");
}

#[tokio::test]
async fn terminate_removes_artifact_and_is_idempotent() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, state) = session_with_mock(root.path());
    let artifact = session.create("nb").await.expect("create");
    assert!(artifact.exists());

    session.terminate().await;

    assert!(!artifact.exists());
    assert_eq!(session.readiness(), Readiness::Dead);
    assert!(state.lock().expect("lock").shutdowns >= 1);

    // A second terminate must not fail or resurrect anything.
    session.terminate().await;
    assert_eq!(session.readiness(), Readiness::Dead);
}

#[tokio::test]
async fn terminate_on_never_started_session_is_safe() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut session, _state) = session_with_mock(root.path());

    session.terminate().await;
    assert_eq!(session.readiness(), Readiness::Dead);
}
